use derive_more::{Display, Error};

/// Domain errors of the planning loop.
///
/// The tick loop matches on these to decide between retaining the previous
/// plan, rejecting a change, or aborting the tick. Everything else travels
/// as a plain [`anyhow::Error`].
#[derive(Debug, Display, Error)]
pub enum PlannerError {
    /// Forecast or price series is missing for the required horizon.
    /// Recoverable: the previous active plan is retained.
    #[display("input unavailable: {_0}")]
    InputUnavailable(#[error(not(source))] String),

    /// The requested state of charge cannot be reached by the deadline.
    /// The planner still produces a best-effort plan.
    #[display("infeasible target: {_0}")]
    InfeasibleTarget(#[error(not(source))] String),

    /// An invalid configuration change. Rejected atomically, the previous
    /// configuration stays in effect.
    #[display("invalid configuration: {_0}")]
    ConfigInvalid(#[error(not(source))] String),

    /// An internal invariant was broken. The tick is aborted and the last
    /// good state preserved.
    #[display("programmer error: {_0}")]
    ProgrammerError(#[error(not(source))] String),
}
