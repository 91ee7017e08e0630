//! Punch matching and incremental results for orienteering competitions.
//!
//! Punches arrive from card read-outs and from radio or online controls.
//! Free punches are filed in a hashed index keyed by the course control they
//! match; read-out cards are evaluated against the runner's course into split
//! tables, running times and statuses; places, team results and split
//! standings are cached against a global data revision and recomputed only
//! when their inputs changed.
//!
//! # Examples
//!
//! ```
//! use orienteer::{
//!     competition::Competition,
//!     config::EngineConfig,
//!     model::{
//!         card::CardDraft,
//!         class::ClassDraft,
//!         course::{ControlDraft, CourseDraft},
//!         runner::RunnerDraft,
//!     },
//!     punch::Punch,
//!     types::{PunchType, RunStatus},
//! };
//!
//! let mut comp = Competition::new(EngineConfig::default());
//! for id in [31, 32] {
//!     comp.add_control(ControlDraft { id, ..ControlDraft::default() }).expect("control");
//! }
//! let course = comp
//!     .add_course(CourseDraft { name: "A".into(), controls: vec![31, 32], ..CourseDraft::default() })
//!     .expect("course");
//! let class = comp
//!     .add_class(ClassDraft { name: "H21".into(), course: Some(course), ..ClassDraft::default() })
//!     .expect("class");
//! let runner = comp
//!     .add_runner(RunnerDraft { name: "Ada".into(), class: Some(class), card_no: 5001, start_time: 0, ..RunnerDraft::default() })
//!     .expect("runner");
//!
//! comp.read_card(CardDraft {
//!     card_no: 5001,
//!     punches: vec![
//!         Punch::manual(PunchType::Control(31), 120),
//!         Punch::manual(PunchType::Control(32), 240),
//!         Punch::manual(PunchType::Finish, 360),
//!     ],
//!     read_id: 1,
//!     voltage_mv: None,
//! })
//! .expect("read-out");
//!
//! let result = comp.runner_result(runner).expect("result");
//! assert_eq!(result.status, RunStatus::OK);
//! assert_eq!(result.running_time, 360);
//! assert_eq!(comp.runner_place(runner).expect("place"), Some(1));
//! ```
#![deny(missing_docs)]

/// Time parsing and formatting.
pub mod clock;
/// Competition state and its edit and query API.
pub mod competition;
/// Engine configuration.
pub mod config;
/// Free-punch store and punch index.
pub mod core;
/// Card evaluation, splits, team aggregation and the result cache.
pub mod engine;
/// Competition entities.
pub mod model;
/// Free-punch journal ops.
pub mod op;
/// Punch-time provenance tags.
pub mod origin;
/// Journal persistence and shared-store synchronization.
pub mod persist;
/// Punch records and free-punch drafts and patches.
pub mod punch;
/// Single-writer async runtime and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
