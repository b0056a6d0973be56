//! In-memory bidirectional simulator (spec §4.4): applies and reverses IR
//! against a synthetic database state, without touching a live database.
//! The live applier (`src/applier.rs`) shares the same forward/reverse
//! dispatch tables against a real [`crate::db::DatabaseBackend`] instead.

mod forward;
mod reverse;
mod state;

pub use forward::ApplyContext;
pub use state::SimState;

use crate::chain::MigrationDefinition;
use crate::error::{EngineError, EngineResult};
use crate::ir::CompiledMigration;

#[derive(Debug, Clone, Default)]
pub struct SimulationWarning {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub state_after: SimState,
    pub warnings: Vec<SimulationWarning>,
}

/// Runs the forward step of `migration`'s compiled operations over
/// `incoming_state` (warm mode), or over an empty state after replaying every
/// ancestor (cold mode) when `incoming_state` is `None` — spec §4.4.
pub fn validate_migration(
    migration: &MigrationDefinition,
    chain: &[MigrationDefinition],
    incoming_state: Option<SimState>,
) -> EngineResult<SimulationOutcome> {
    let state_before = match incoming_state {
        Some(s) => s,
        None => replay_ancestors_cold(migration, chain)?,
    };

    let compiled = migration.compile()?;
    let mut state = state_before;
    apply_compiled_forward(&mut state, &compiled, migration)?;

    let mut warnings = Vec::new();
    if compiled.is_lossy() {
        warnings.push(SimulationWarning { message: format!("migration {} is lossy", migration.id) });
    }
    if compiled.is_irreversible() {
        warnings.push(SimulationWarning { message: format!("migration {} is irreversible", migration.id) });
    }

    Ok(SimulationOutcome { state_after: state, warnings })
}

/// Cold replay: re-simulate every migration up to and including `target`,
/// starting from an empty state. `O(n^2)` across a whole-chain validation
/// pass; callers validating sequentially should thread `state_after` through
/// instead (warm mode).
fn replay_ancestors_cold(target: &MigrationDefinition, chain: &[MigrationDefinition]) -> EngineResult<SimState> {
    let mut state = SimState::empty();
    for m in chain {
        if m.id == target.id {
            break;
        }
        let compiled = m.compile()?;
        apply_compiled_forward(&mut state, &compiled, m)?;
    }
    Ok(state)
}

fn apply_compiled_forward(
    state: &mut SimState,
    compiled: &CompiledMigration,
    migration: &MigrationDefinition,
) -> EngineResult<()> {
    let ctx = ApplyContext { migration_id: &migration.id, schemas: &migration.schemas, strict: true };
    for op in &compiled.operations {
        forward::apply_operation(state, op, &ctx)?;
    }
    Ok(())
}

fn apply_compiled_reverse(
    state: &mut SimState,
    compiled: &CompiledMigration,
    migration: &MigrationDefinition,
) -> EngineResult<()> {
    let ctx = ApplyContext { migration_id: &migration.id, schemas: &migration.schemas, strict: true };
    for op in compiled.operations.iter().rev() {
        reverse::reverse_operation(state, op, &ctx)?;
    }
    Ok(())
}

/// Proves `reverse(apply(state_before)) == state_before` (spec §4.4, testable
/// property 4). Skipped by callers for migrations marked `irreversible`.
pub fn prove_reversibility(migration: &MigrationDefinition, state_before: &SimState) -> EngineResult<()> {
    let compiled = migration.compile()?;
    if compiled.is_irreversible() {
        return Ok(());
    }
    let mut forward_state = state_before.clone();
    apply_compiled_forward(&mut forward_state, &compiled, migration)?;
    let mut reversed_state = forward_state;
    apply_compiled_reverse(&mut reversed_state, &compiled, migration)?;

    if !reversed_state.equal_modulo_order(state_before) {
        return Err(EngineError::ReversibilityMismatch {
            migration_id: migration.id.clone(),
            diff: state_before.diff(&reversed_state),
        });
    }
    Ok(())
}
