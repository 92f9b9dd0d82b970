//! Moderation scan pipeline.
//!
//! Every inbound chat message flows through:
//! 1. `MessageProcessor` eligibility + `DedupeCache`: skip what must not be scanned
//! 2. `SituationSelector`: pick the prompt family (pure, no I/O)
//! 3. `ScanQueue`: bounded concurrency, backpressure, transport retries
//! 4. `Scanner` + `validator`: model call, schema check, fallback prompt
//! 5. `decision`: flag threshold, then the auto-action gate
//!
//! **Nothing is enforced unless the decision gate passes in an auto-mode guild.**

pub mod decision;
pub mod dedupe;
pub mod processor;
pub mod queue;
pub mod situation;
pub mod stores;
pub mod types;
pub mod validator;

pub use processor::{MessageProcessor, ProcessOutcome, ScanReport, SkipReason};
pub use queue::{QueueStats, ScanQueue};
