//! PGDEBUG Hooks - Interceptor Chain and Query Interface
//!
//! Wraps the host's post-parse-analysis and planning stages with composable
//! interceptors, records snapshots through [`CaptureInterceptor`], and serves
//! the recorded history back through [`QueryInterface`].
//!
//! Nothing in this crate knows about PostgreSQL: the host's types come in
//! through the [`Pipeline`] trait. The pgrx binding lives in pgdebug-pg.

pub mod capture;
pub mod chain;
pub mod pipeline;
pub mod query;

pub use capture::CaptureInterceptor;
pub use chain::{
    HookRegistry, InterceptorChain, InterceptorId, ParseAnalyzeInterceptor, ParseAnalyzeNext,
    PlannerInterceptor, PlannerNext,
};
pub use pipeline::{NodeRenderer, Pipeline};
pub use query::{parse_filter, CallerContext, QueryInterface, StatementRow};
