use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{Aggregate, AggregateRoot, DomainError, ExperimentId, SiteId, TenantId};
use boxprice_events::Event;

use crate::assignment::{self, Assignment};
use crate::error::ExperimentError;
use crate::stats::{self, ExperimentOutcome, VariantStats};
use crate::variant::{Variant, VariantConfig, validate_variants};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

fn default_traffic() -> f64 {
    100.0
}

fn default_min_sample() -> u64 {
    100
}

fn default_confidence() -> f64 {
    95.0
}

fn default_duration() -> u32 {
    14
}

/// Experiment as submitted by staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` runs the experiment across every site of the tenant.
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub variants: Vec<VariantConfig>,
    #[serde(default = "default_traffic")]
    pub traffic_percentage: f64,
    #[serde(default = "default_min_sample")]
    pub min_sample_size: u64,
    /// Either a fraction (`0.95`) or a percentage (`95`).
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
    #[serde(default = "default_duration")]
    pub duration_days: u32,
}

/// Command: CreateExperiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExperiment {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub definition: ExperimentDefinition,
    pub occurred_at: DateTime<Utc>,
}

/// Command shared by the plain lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionExperiment {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteExperiment, carrying the outcome to freeze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteExperiment {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub outcome: ExperimentOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExperimentCommand {
    Create(CreateExperiment),
    Start(TransitionExperiment),
    Pause(TransitionExperiment),
    Resume(TransitionExperiment),
    Complete(CompleteExperiment),
    Cancel(TransitionExperiment),
}

/// Event: ExperimentCreated (validated definition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCreated {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub name: String,
    pub description: Option<String>,
    pub site_id: Option<SiteId>,
    pub variants: Vec<Variant>,
    pub traffic_percentage: f64,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub duration_days: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentTransitioned {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCompleted {
    pub tenant_id: TenantId,
    pub experiment_id: ExperimentId,
    pub outcome: ExperimentOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExperimentEvent {
    Created(ExperimentCreated),
    Started(ExperimentTransitioned),
    Paused(ExperimentTransitioned),
    Resumed(ExperimentTransitioned),
    Completed(ExperimentCompleted),
    Cancelled(ExperimentTransitioned),
}

impl ExperimentEvent {
    pub fn experiment_id(&self) -> ExperimentId {
        match self {
            ExperimentEvent::Created(e) => e.experiment_id,
            ExperimentEvent::Completed(e) => e.experiment_id,
            ExperimentEvent::Started(e)
            | ExperimentEvent::Paused(e)
            | ExperimentEvent::Resumed(e)
            | ExperimentEvent::Cancelled(e) => e.experiment_id,
        }
    }
}

impl Event for ExperimentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExperimentEvent::Created(_) => "experiments.experiment.created",
            ExperimentEvent::Started(_) => "experiments.experiment.started",
            ExperimentEvent::Paused(_) => "experiments.experiment.paused",
            ExperimentEvent::Resumed(_) => "experiments.experiment.resumed",
            ExperimentEvent::Completed(_) => "experiments.experiment.completed",
            ExperimentEvent::Cancelled(_) => "experiments.experiment.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExperimentEvent::Created(e) => e.occurred_at,
            ExperimentEvent::Completed(e) => e.occurred_at,
            ExperimentEvent::Started(e)
            | ExperimentEvent::Paused(e)
            | ExperimentEvent::Resumed(e)
            | ExperimentEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

/// Aggregate root: PricingExperiment.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingExperiment {
    id: ExperimentId,
    tenant_id: Option<TenantId>,
    name: String,
    description: Option<String>,
    site_id: Option<SiteId>,
    variants: Vec<Variant>,
    traffic_percentage: f64,
    min_sample_size: u64,
    confidence_level: f64,
    duration_days: u32,
    status: ExperimentStatus,
    created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    outcome: Option<ExperimentOutcome>,
    version: u64,
    created: bool,
}

impl PricingExperiment {
    /// Empty, not-yet-created instance for rehydration.
    pub fn empty(id: ExperimentId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            description: None,
            site_id: None,
            variants: Vec::new(),
            traffic_percentage: 0.0,
            min_sample_size: 0,
            confidence_level: 0.0,
            duration_days: 0,
            status: ExperimentStatus::Draft,
            created_at: None,
            started_at: None,
            ended_at: None,
            outcome: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild from a stored event stream.
    pub fn from_events<'a>(id: ExperimentId, events: impl IntoIterator<Item = &'a ExperimentEvent>) -> Self {
        let mut experiment = Self::empty(id);
        for event in events {
            experiment.apply(event);
        }
        experiment
    }

    /// Handle a command and apply the resulting events.
    pub fn execute(&mut self, command: &ExperimentCommand) -> Result<Vec<ExperimentEvent>, ExperimentError> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn site_id(&self) -> Option<SiteId> {
        self.site_id
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn traffic_percentage(&self) -> f64 {
        self.traffic_percentage
    }

    pub fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    /// Fraction in `(0, 1)`.
    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn duration_days(&self) -> u32 {
        self.duration_days
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Frozen result of a completed experiment.
    pub fn outcome(&self) -> Option<&ExperimentOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    pub fn applies_to_site(&self, site: SiteId) -> bool {
        self.site_id.is_none_or(|s| s == site)
    }

    /// Planned end: start plus `duration_days`.
    pub fn scheduled_end(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|s| s + Duration::days(i64::from(self.duration_days)))
    }

    pub fn is_past_duration(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_end().is_some_and(|end| now >= end)
    }

    /// Variant for a visitor. Only running experiments assign traffic.
    pub fn assign(&self, visitor_id: &str) -> Result<Option<&Variant>, ExperimentError> {
        if !self.is_running() {
            return Err(ExperimentError::NotRunning(self.status));
        }
        Ok(
            match assignment::assign(self.id, visitor_id, self.traffic_percentage, &self.variants) {
                Assignment::Variant(idx) => self.variants.get(idx),
                Assignment::NotInExperiment => None,
            },
        )
    }

    /// Significance over the given stats; a completed experiment returns its frozen outcome.
    pub fn evaluate(&self, stats: Vec<VariantStats>, at: DateTime<Utc>) -> ExperimentOutcome {
        if let Some(frozen) = &self.outcome {
            return frozen.clone();
        }
        stats::evaluate(stats, self.min_sample_size, self.confidence_level, at)
    }
}

impl AggregateRoot for PricingExperiment {
    type Id = ExperimentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for PricingExperiment {
    type Command = ExperimentCommand;
    type Event = ExperimentEvent;
    type Error = ExperimentError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExperimentEvent::Created(e) => {
                self.id = e.experiment_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.site_id = e.site_id;
                self.variants = e.variants.clone();
                self.traffic_percentage = e.traffic_percentage;
                self.min_sample_size = e.min_sample_size;
                self.confidence_level = e.confidence_level;
                self.duration_days = e.duration_days;
                self.status = ExperimentStatus::Draft;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ExperimentEvent::Started(e) => {
                self.status = ExperimentStatus::Running;
                self.started_at = Some(e.occurred_at);
            }
            ExperimentEvent::Paused(_) => {
                self.status = ExperimentStatus::Paused;
            }
            ExperimentEvent::Resumed(_) => {
                self.status = ExperimentStatus::Running;
            }
            ExperimentEvent::Completed(e) => {
                self.status = ExperimentStatus::Completed;
                self.outcome = Some(e.outcome.clone());
                self.ended_at = Some(e.occurred_at);
            }
            ExperimentEvent::Cancelled(e) => {
                self.status = ExperimentStatus::Cancelled;
                self.ended_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExperimentCommand::Create(cmd) => self.handle_create(cmd),
            ExperimentCommand::Start(cmd) => {
                self.ensure_transition(cmd, "start", &[ExperimentStatus::Draft])?;
                Ok(vec![ExperimentEvent::Started(transitioned(cmd))])
            }
            ExperimentCommand::Pause(cmd) => {
                self.ensure_transition(cmd, "pause", &[ExperimentStatus::Running])?;
                Ok(vec![ExperimentEvent::Paused(transitioned(cmd))])
            }
            ExperimentCommand::Resume(cmd) => {
                self.ensure_transition(cmd, "resume", &[ExperimentStatus::Paused])?;
                Ok(vec![ExperimentEvent::Resumed(transitioned(cmd))])
            }
            ExperimentCommand::Complete(cmd) => self.handle_complete(cmd),
            ExperimentCommand::Cancel(cmd) => {
                self.ensure_transition(
                    cmd,
                    "cancel",
                    &[ExperimentStatus::Draft, ExperimentStatus::Running, ExperimentStatus::Paused],
                )?;
                Ok(vec![ExperimentEvent::Cancelled(transitioned(cmd))])
            }
        }
    }
}

fn transitioned(cmd: &TransitionExperiment) -> ExperimentTransitioned {
    ExperimentTransitioned {
        tenant_id: cmd.tenant_id,
        experiment_id: cmd.experiment_id,
        occurred_at: cmd.occurred_at,
    }
}

impl PricingExperiment {
    fn ensure_target(&self, tenant_id: TenantId, experiment_id: ExperimentId) -> Result<(), ExperimentError> {
        if !self.created {
            return Err(DomainError::not_found().into());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::TenantMismatch.into());
        }
        if self.id != experiment_id {
            return Err(DomainError::invariant("experiment_id mismatch").into());
        }
        if self.status == ExperimentStatus::Completed {
            return Err(ExperimentError::Frozen);
        }
        Ok(())
    }

    fn ensure_transition(
        &self,
        cmd: &TransitionExperiment,
        action: &'static str,
        allowed_from: &[ExperimentStatus],
    ) -> Result<(), ExperimentError> {
        self.ensure_target(cmd.tenant_id, cmd.experiment_id)?;
        if !allowed_from.contains(&self.status) {
            return Err(ExperimentError::InvalidTransition {
                from: self.status,
                action,
            });
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateExperiment) -> Result<Vec<ExperimentEvent>, ExperimentError> {
        if self.created {
            return Err(DomainError::conflict("experiment already exists").into());
        }
        let def = &cmd.definition;

        if def.name.trim().is_empty() {
            return Err(ExperimentError::configuration("name cannot be empty"));
        }
        if !def.traffic_percentage.is_finite() || !(0.0..=100.0).contains(&def.traffic_percentage) {
            return Err(ExperimentError::configuration(format!(
                "traffic_percentage must be within [0, 100] (got {})",
                def.traffic_percentage
            )));
        }
        let confidence_level = if def.confidence_level > 1.0 {
            def.confidence_level / 100.0
        } else {
            def.confidence_level
        };
        if !confidence_level.is_finite() || confidence_level <= 0.0 || confidence_level >= 1.0 {
            return Err(ExperimentError::configuration(format!(
                "confidence_level must be within (0, 100) (got {})",
                def.confidence_level
            )));
        }
        if def.min_sample_size == 0 {
            return Err(ExperimentError::configuration("min_sample_size must be at least 1"));
        }
        if def.duration_days == 0 {
            return Err(ExperimentError::configuration("duration_days must be at least 1"));
        }
        let variants = validate_variants(&def.variants)?;

        Ok(vec![ExperimentEvent::Created(ExperimentCreated {
            tenant_id: cmd.tenant_id,
            experiment_id: cmd.experiment_id,
            name: def.name.trim().to_string(),
            description: def.description.clone(),
            site_id: def.site_id,
            variants,
            traffic_percentage: def.traffic_percentage,
            min_sample_size: def.min_sample_size,
            confidence_level,
            duration_days: def.duration_days,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteExperiment) -> Result<Vec<ExperimentEvent>, ExperimentError> {
        self.ensure_target(cmd.tenant_id, cmd.experiment_id)?;
        if !matches!(self.status, ExperimentStatus::Running | ExperimentStatus::Paused) {
            return Err(ExperimentError::InvalidTransition {
                from: self.status,
                action: "complete",
            });
        }
        if let Some(winner) = &cmd.outcome.winning_variant {
            if self.variant(winner).is_none() {
                return Err(ExperimentError::UnknownVariant(winner.clone()));
            }
        }

        Ok(vec![ExperimentEvent::Completed(ExperimentCompleted {
            tenant_id: cmd.tenant_id,
            experiment_id: cmd.experiment_id,
            outcome: cmd.outcome.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::OutcomeDecision;
    use crate::variant::ModifierType;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn definition() -> ExperimentDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "plus ten percent",
            "variants": [
                { "name": "control", "weight": 0.5, "price_modifier": 1.0 },
                { "name": "plus10", "weight": 0.5, "price_modifier": 1.1 }
            ]
        }))
        .unwrap()
    }

    fn created() -> (PricingExperiment, TenantId) {
        let tenant = TenantId::new();
        let id = ExperimentId::new();
        let mut exp = PricingExperiment::empty(id);
        exp.execute(&ExperimentCommand::Create(CreateExperiment {
            tenant_id: tenant,
            experiment_id: id,
            definition: definition(),
            occurred_at: at("2026-10-01T00:00:00Z"),
        }))
        .unwrap();
        (exp, tenant)
    }

    fn transition(exp: &PricingExperiment, tenant: TenantId, when: &str) -> TransitionExperiment {
        TransitionExperiment {
            tenant_id: tenant,
            experiment_id: exp.experiment_id(),
            occurred_at: at(when),
        }
    }

    fn outcome(winner: Option<&str>) -> ExperimentOutcome {
        ExperimentOutcome {
            decision: if winner.is_some() {
                OutcomeDecision::Winner
            } else {
                OutcomeDecision::Inconclusive
            },
            winning_variant: winner.map(str::to_string),
            revenue_lift: winner.map(|_| 12.5),
            p_value: Some(0.01),
            variants: Vec::new(),
            evaluated_at: at("2026-10-15T00:00:00Z"),
        }
    }

    #[test]
    fn definition_defaults_apply() {
        let (exp, _) = created();
        assert_eq!(exp.status(), ExperimentStatus::Draft);
        assert_eq!(exp.traffic_percentage(), 100.0);
        assert_eq!(exp.min_sample_size(), 100);
        assert!((exp.confidence_level() - 0.95).abs() < 1e-12);
        assert_eq!(exp.duration_days(), 14);
        assert_eq!(exp.version(), 1);
        assert_eq!(exp.variants()[1].weight, 0.5);
    }

    #[test]
    fn definition_rejects_unknown_fields() {
        let err = serde_json::from_value::<ExperimentDefinition>(serde_json::json!({
            "name": "x",
            "variants": [],
            "trafic_percentage": 50
        }));
        assert!(err.is_err());
    }

    #[test]
    fn invalid_traffic_never_creates() {
        let mut def = definition();
        def.traffic_percentage = 120.0;
        let id = ExperimentId::new();
        let err = PricingExperiment::empty(id)
            .handle(&ExperimentCommand::Create(CreateExperiment {
                tenant_id: TenantId::new(),
                experiment_id: id,
                definition: def,
                occurred_at: at("2026-10-01T00:00:00Z"),
            }))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
    }

    #[test]
    fn bad_weights_are_configuration_errors() {
        let mut def = definition();
        def.variants.push(VariantConfig {
            name: "plus20".into(),
            weight: 0.2,
            price_modifier: 20.0,
            modifier_type: ModifierType::Percentage,
        });
        let id = ExperimentId::new();
        let err = PricingExperiment::empty(id)
            .handle(&ExperimentCommand::Create(CreateExperiment {
                tenant_id: TenantId::new(),
                experiment_id: id,
                definition: def,
                occurred_at: at("2026-10-01T00:00:00Z"),
            }))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
    }

    #[test]
    fn lifecycle_records_timestamps() {
        let (mut exp, tenant) = created();
        exp.execute(&ExperimentCommand::Start(transition(&exp, tenant, "2026-10-02T00:00:00Z")))
            .unwrap();
        assert!(exp.is_running());
        assert_eq!(exp.started_at(), Some(at("2026-10-02T00:00:00Z")));
        assert_eq!(exp.scheduled_end(), Some(at("2026-10-16T00:00:00Z")));

        exp.execute(&ExperimentCommand::Pause(transition(&exp, tenant, "2026-10-03T00:00:00Z")))
            .unwrap();
        assert_eq!(exp.status(), ExperimentStatus::Paused);
        assert!(matches!(exp.assign("visitor-1"), Err(ExperimentError::NotRunning(_))));

        exp.execute(&ExperimentCommand::Resume(transition(&exp, tenant, "2026-10-04T00:00:00Z")))
            .unwrap();
        assert!(exp.assign("visitor-1").unwrap().is_some());

        exp.execute(&ExperimentCommand::Complete(CompleteExperiment {
            tenant_id: tenant,
            experiment_id: exp.experiment_id(),
            outcome: outcome(Some("plus10")),
            occurred_at: at("2026-10-16T00:00:00Z"),
        }))
        .unwrap();
        assert_eq!(exp.status(), ExperimentStatus::Completed);
        assert_eq!(exp.ended_at(), Some(at("2026-10-16T00:00:00Z")));
        assert_eq!(exp.version(), 5);
    }

    #[test]
    fn completed_experiment_is_frozen() {
        let (mut exp, tenant) = created();
        exp.execute(&ExperimentCommand::Start(transition(&exp, tenant, "2026-10-02T00:00:00Z")))
            .unwrap();
        exp.execute(&ExperimentCommand::Complete(CompleteExperiment {
            tenant_id: tenant,
            experiment_id: exp.experiment_id(),
            outcome: outcome(Some("plus10")),
            occurred_at: at("2026-10-16T00:00:00Z"),
        }))
        .unwrap();

        let err = exp
            .handle(&ExperimentCommand::Cancel(transition(&exp, tenant, "2026-10-17T00:00:00Z")))
            .unwrap_err();
        assert_eq!(err, ExperimentError::Frozen);

        // Re-evaluation returns the frozen result regardless of new stats.
        let again = exp.evaluate(Vec::new(), at("2026-10-20T00:00:00Z"));
        assert_eq!(again.winning_variant.as_deref(), Some("plus10"));
        assert_eq!(again.revenue_lift, Some(12.5));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let (exp, tenant) = created();
        let err = exp
            .handle(&ExperimentCommand::Pause(transition(&exp, tenant, "2026-10-02T00:00:00Z")))
            .unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::InvalidTransition {
                from: ExperimentStatus::Draft,
                action: "pause"
            }
        ));

        let err = exp
            .handle(&ExperimentCommand::Complete(CompleteExperiment {
                tenant_id: tenant,
                experiment_id: exp.experiment_id(),
                outcome: outcome(None),
                occurred_at: at("2026-10-02T00:00:00Z"),
            }))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidTransition { .. }));
    }

    #[test]
    fn cross_tenant_command_is_rejected() {
        let (exp, _) = created();
        let err = exp
            .handle(&ExperimentCommand::Start(transition(&exp, TenantId::new(), "2026-10-02T00:00:00Z")))
            .unwrap_err();
        assert_eq!(err, ExperimentError::Domain(DomainError::TenantMismatch));
    }

    #[test]
    fn winner_must_be_a_known_variant() {
        let (mut exp, tenant) = created();
        exp.execute(&ExperimentCommand::Start(transition(&exp, tenant, "2026-10-02T00:00:00Z")))
            .unwrap();
        let err = exp
            .handle(&ExperimentCommand::Complete(CompleteExperiment {
                tenant_id: tenant,
                experiment_id: exp.experiment_id(),
                outcome: outcome(Some("ghost")),
                occurred_at: at("2026-10-16T00:00:00Z"),
            }))
            .unwrap_err();
        assert_eq!(err, ExperimentError::UnknownVariant("ghost".into()));
    }

    #[test]
    fn rebuild_from_events_matches_live_state() {
        let (mut exp, tenant) = created();
        let mut history = Vec::new();
        let create = ExperimentEvent::Created(ExperimentCreated {
            tenant_id: tenant,
            experiment_id: exp.experiment_id(),
            name: exp.name().to_string(),
            description: None,
            site_id: None,
            variants: exp.variants().to_vec(),
            traffic_percentage: 100.0,
            min_sample_size: 100,
            confidence_level: exp.confidence_level(),
            duration_days: 14,
            occurred_at: at("2026-10-01T00:00:00Z"),
        });
        history.push(create);
        history.extend(
            exp.execute(&ExperimentCommand::Start(transition(&exp, tenant, "2026-10-02T00:00:00Z")))
                .unwrap(),
        );

        let rebuilt = PricingExperiment::from_events(exp.experiment_id(), &history);
        assert_eq!(rebuilt, exp);
    }
}
