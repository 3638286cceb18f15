//! Keyword monitors and alert delivery
//!
//! Each active monitor owns a cron job. A firing job runs the monitor's
//! keyword query over a lookback window and, when anything matches, asks the
//! summarizer for an analysis and sends the result to the monitor's channel.

pub mod config;
pub mod notifier;
pub mod pipeline;
pub mod schedule;
pub mod scheduler;
pub mod summarizer;

pub use config::{ChannelKind, Monitor, MonitorStatus, NotificationChannel};
pub use notifier::{Dispatcher, Notifier, NotifyError};
pub use pipeline::{AlertPipeline, PipelineConfig, RunOutcome};
pub use schedule::{CronSchedule, ScheduleError};
pub use scheduler::MonitorScheduler;
pub use summarizer::{ModelProfile, OpenAiSummarizer, SummarizeError, Summarizer};
