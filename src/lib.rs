//! jobmesh - the scheduling core of a distributed job system.
//!
//! A [`Scheduler`] scans the [`JobStore`] for due jobs and hands each firing
//! to a [`TriggerDispatcher`]. Dispatch routes the firing to an executor
//! through the [`RouterSet`] or runs it in-process with [`LocalDispatcher`].
//! [`JobConfigManager`] owns the job lifecycle, and script jobs are turned
//! into handlers by a [`HandlerCompiler`].

pub mod config;
pub mod core;
pub mod glue;
pub mod manager;
pub mod routing;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod trigger;

pub use config::{ConfigError, CoreConfig, JobConfig, YamlLoader, register_jobs};
pub use core::handler::{
    ComponentLookup, ComponentRegistry, HandlerError, HandlerRegistry, Injectable,
    InjectionReport, JobHandler,
};
pub use core::job::{GlueType, JobDefinition, JobStatus, MisfireStrategy};
pub use core::schedule::{Schedule, ScheduleError, ScheduleType};
pub use core::types::{CandidateList, ExecutorCandidate, JobId, TriggerContext, TriggerType};
pub use glue::{
    GlueCompiler, GlueError, GlueOptions, HandlerCompiler, InjectingGlueCompiler, QuickJsEngine,
    build_compiler,
};
pub use manager::{JobConfigManager, ManagerError};
pub use routing::{ExecutorRouter, RouteStrategy, RouterSet, RoutingOptions};
pub use scheduler::{
    ScanReport, Scheduler, SchedulerError, SchedulerHandle, SchedulerOptions, SchedulerState,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteJobStore;
pub use storage::{InMemoryJobStore, JobStore, StorageError};
pub use trigger::{
    CandidateSource, DispatchError, ExecutorTransport, LocalDispatcher, RoutingDispatcher,
    StaticCandidates, TriggerDispatcher,
};
