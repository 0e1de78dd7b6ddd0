//! Arena handles.
//!
//! The teacher indexed processes and resources by raw `usize` (`ProcessId`,
//! `ResourceId`) into `Vec`s it never shrank — see its own `// FIXME:
//! removing the process from the vector would invalidate all existing
//! ProcessIds` comment. Generation-checked `slotmap` keys close that gap and
//! match design note [9]'s "Environment owns all events by stable handle".

slotmap::new_key_type! {
    /// Handle to an entry in the event graph (plain events, timeouts,
    /// conditions, processes, and resource/container/store operation
    /// events all live in the same arena).
    pub struct EventId;

    /// Handle to a `Resource`/`PriorityResource`/`PreemptiveResource`.
    pub struct ResourceId;

    /// Handle to a `Container`.
    pub struct ContainerId;

    /// Handle to a `Store`/`PriorityStore`/`FilterStore`.
    pub struct StoreId;
}
