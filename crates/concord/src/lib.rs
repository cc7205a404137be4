//! # Concord
//!
//! A synchronization engine for independent components.
//!
//! Components own their state and expose named operations; they never call
//! each other. Every completed operation is appended to a shared
//! invocation log, and declarative rules - `when` patterns, an optional
//! async `where` stage, `then` dispatches - react to what the log records,
//! joining causally linked invocations through variable unification and
//! cascading further operations breadth-first until nothing new matches.
//!
//! ```text
//!                      +-----------------------------+
//!   external trigger   |            Engine           |
//!  ------------------> |                             |
//!                      |  InvocationLog (append-only)|
//!                      |        |                    |
//!                      |        v                    |
//!                      |  Matcher ---> FrameSet      |
//!                      |        |                    |
//!                      |        v                    |
//!                      |  Enrichment (where, queries)|
//!                      |        |                    |
//!                      |        v                    |
//!                      |  Dispatcher ---> Components |
//!                      |        |            |       |
//!                      |        +--- log <---+       |
//!                      +-----------------------------+
//! ```
//!
//! The log is the only coupling surface: adding a feature means adding a
//! rule, not editing the components it observes.
//!
//! ## A minimal engine
//!
//! ```ignore
//! let engine = Engine::builder()
//!     .component(Accounts::default())
//!     .component(Mailer::default())
//!     .rule(
//!         Rule::build("welcome-on-register")
//!             .when(Pattern::of("accounts", "register")
//!                 .with_output("id", PatternValue::var("user")))
//!             .then(Pattern::of("mailer", "welcome")
//!                 .with_input("to", PatternValue::var("user")))
//!             .finish()?,
//!     )
//!     .build()?;
//!
//! let report = engine
//!     .submit(OpRef::new("accounts", "register"), args! { "name" => "ada" })
//!     .await?;
//! assert_eq!(report.fired, vec!["welcome-on-register"]);
//! ```

pub mod boundary;
pub mod component;
mod dispatch;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod frame;
pub mod invocation;
pub mod matcher;
pub mod pattern;
pub mod registry;
pub mod rule;
pub mod value;

pub use boundary::{Boundary, Route, RouteTable};
pub use component::{is_query, Component, ComponentMap, OpOutcome};
pub use engine::{CascadePhase, CascadeReport, Engine, EngineBuilder};
pub use enrich::{QueryContext, WhereClause, WhereFn};
pub use error::ConcordError;
pub use frame::{Frame, FrameSet};
pub use invocation::{Invocation, InvocationId, InvocationLog, OpRef, ParentSet};
pub use matcher::match_rule;
pub use pattern::{Pattern, PatternValue};
pub use registry::RuleBook;
pub use rule::{Rule, RuleBuilder};
pub use value::{str_arg, Args, Value};
