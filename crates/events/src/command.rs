use proofing_core::{Aggregate, AggregateId};

/// Which stream a command addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// Start a new stream. `None` lets the handler allocate the id.
    Create(Option<AggregateId>),
    /// Act on an existing stream; an id with no history is not-found.
    Existing(AggregateId),
}

impl CommandTarget {
    pub fn aggregate_id(&self) -> Option<AggregateId> {
        match self {
            CommandTarget::Create(id) => *id,
            CommandTarget::Existing(id) => Some(*id),
        }
    }
}

/// A request to change one aggregate.
///
/// Commands represent **intent**. They are transient (never persisted), carry no
/// identity of their own and are consumed by exactly one handler invocation.
/// Accepted commands turn into events; rejected ones leave no trace.
///
/// Routing is static: the associated `Aggregate` names the aggregate type the
/// command is executed against, so there is no runtime command registry.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    type Aggregate: Aggregate<Command = Self>;

    fn target(&self) -> CommandTarget;
}

/// Execute a command against an in-memory aggregate (no IO).
///
/// Returns the events recorded by this invocation. The aggregate keeps them in
/// its uncommitted buffer as well; persistence is the repository's job.
///
/// Useful in unit tests and anywhere the full handler pipeline is unnecessary.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let before = aggregate.uncommitted_events().len();
    aggregate.handle(command)?;
    Ok(aggregate.uncommitted_events()[before..].to_vec())
}
