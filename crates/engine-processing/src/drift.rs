use crate::error::DriftError;
use engine_core::state::StateStore;
use model::{
    core::identifiers::EntityId,
    records::batch::Batch,
    schema::{
        drift::{ChangeKind, DriftClass, DriftReport, FieldChange},
        field_map::FieldMap,
        version::SchemaVersion,
    },
};
use std::sync::Arc;
use tracing::{debug, info};

/// Compares an incoming field map against the registered one.
///
/// Pure: the result depends only on the two maps. With nothing registered
/// every field is additive.
pub fn classify(registered: Option<&FieldMap>, incoming: &FieldMap) -> DriftReport {
    let mut changes = Vec::new();

    for (field, incoming_ty) in incoming.iter() {
        let kind = match registered.and_then(|r| r.get(field)) {
            None => Some(ChangeKind::Added {
                incoming: *incoming_ty,
            }),
            Some(registered_ty) if registered_ty.accepts(incoming_ty) => None,
            Some(registered_ty) if registered_ty.widens_to(incoming_ty) => {
                Some(ChangeKind::Widened {
                    from: *registered_ty,
                    to: *incoming_ty,
                })
            }
            Some(registered_ty) => Some(ChangeKind::Breaking {
                registered: *registered_ty,
                incoming: *incoming_ty,
            }),
        };
        if let Some(kind) = kind {
            changes.push(FieldChange {
                field: field.clone(),
                kind,
            });
        }
    }

    if let Some(registered) = registered {
        for (field, registered_ty) in registered.iter() {
            if incoming.get(field).is_none() {
                changes.push(FieldChange {
                    field: field.clone(),
                    kind: ChangeKind::Missing {
                        registered: *registered_ty,
                    },
                });
            }
        }
    }

    let class = changes
        .iter()
        .map(|c| c.kind.class())
        .max()
        .unwrap_or(DriftClass::Unchanged);

    DriftReport { class, changes }
}

/// What the detector decided for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftOutcome {
    /// The batch may load against `schema`, which is a new version when the
    /// drift was additive or widened.
    Accepted {
        report: DriftReport,
        schema: SchemaVersion,
    },
    Breaking {
        report: DriftReport,
        registered: Option<SchemaVersion>,
    },
}

impl DriftOutcome {
    pub fn report(&self) -> &DriftReport {
        match self {
            DriftOutcome::Accepted { report, .. } | DriftOutcome::Breaking { report, .. } => report,
        }
    }
}

/// Drift detection backed by the schema registry in the state store.
#[derive(Clone)]
pub struct DriftDetector {
    state: Arc<dyn StateStore>,
}

impl DriftDetector {
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    /// Classifies `incoming` against the latest registered version.
    pub async fn inspect(
        &self,
        entity: &EntityId,
        incoming: &FieldMap,
    ) -> Result<(DriftReport, Option<SchemaVersion>), DriftError> {
        let latest = self.state.latest_schema(entity).await?;
        let report = classify(latest.as_ref().map(|v| &v.fields), incoming);
        Ok((report, latest))
    }

    /// Accepts a non-breaking field map, appending a version when it adds or
    /// widens anything. Returns the version batches should load against.
    pub async fn register(
        &self,
        entity: &EntityId,
        current: Option<&SchemaVersion>,
        incoming: &FieldMap,
    ) -> Result<SchemaVersion, DriftError> {
        if let Some(current) = current
            && classify(Some(&current.fields), incoming).class == DriftClass::Unchanged
        {
            return Ok(current.clone());
        }

        let fields = match current {
            Some(current) => current.fields.merged_with(incoming),
            None => incoming.clone(),
        };
        let version = self
            .state
            .append_schema(entity, current.map(|v| v.version), fields)
            .await?;
        info!(
            entity = %entity,
            version = version.version,
            fields = version.fields.len(),
            "schema version registered"
        );
        Ok(version)
    }

    /// Infers the batch's shape, tags it with the version active at fetch
    /// time and registers non-breaking drift.
    pub async fn evaluate(&self, batch: &mut Batch) -> Result<DriftOutcome, DriftError> {
        let incoming = FieldMap::infer(&batch.records)?;
        let (report, latest) = self.inspect(&batch.entity, &incoming).await?;
        batch.schema_version = latest.as_ref().map(|v| v.version);

        info!(
            entity = %batch.entity,
            batch_id = %batch.id,
            class = %report.class,
            changes = report.changes.len(),
            "drift classified"
        );
        for change in &report.changes {
            debug!(entity = %batch.entity, change = %change, "field change");
        }

        if !report.class.is_loadable() {
            return Ok(DriftOutcome::Breaking {
                report,
                registered: latest,
            });
        }

        let schema = self
            .register(&batch.entity, latest.as_ref(), &incoming)
            .await?;
        Ok(DriftOutcome::Accepted { report, schema })
    }
}
