pub use crate::config::EngineConfig;
pub use crate::error::WorkError;
pub use crate::flow::{Flow, RunId, SubscriptionHandle};
pub use crate::scheduler::{Scheduler, SchedulerMode, TaskHandle, VirtualScheduler, WorkerPool};
pub use crate::signal::{Demand, Signal, SignalKind, Subscriber};
pub use crate::testkit::{FlowVerifier, Recorder, VerifyError};
pub use crate::utils::{CancelToken, HealthFlag};
