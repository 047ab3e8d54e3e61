//! Domain model (deliveries, decisions, strategies, loop state, errors).

pub mod decision;
pub mod delivery;
pub mod errors;
pub mod state;
pub mod strategy;

pub use decision::{
    CycleKey, CycleKeyExtractor, Instruction, JsonPointerKey, MessageChecker, RemovePredicate,
    check_with, key_from, remove_when,
};
pub use delivery::{ConsumerTag, Delivery, DeliveryTag, Payload};
pub use errors::{BrokerError, PredicateError, SweepError};
pub use state::{LoopPhase, LoopState, StopReason};
pub use strategy::{DEFAULT_DRAIN_GRACE, DEFAULT_IDLE_TIMEOUT, LoopStrategy};
