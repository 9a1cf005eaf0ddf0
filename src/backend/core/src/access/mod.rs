//! Access control: roles, caller contexts, grants, and the decision engine.

pub mod context;
pub mod deidentify;
pub mod engine;
pub mod grants;
pub mod roles;

pub use context::CallerContext;
pub use engine::{AccessControlEngine, ReadAccess, ResourceAttrs};
pub use grants::{BreakGlassGrant, GrantRegistry, RoleAssignment};
pub use roles::{ReadScope, RoleKind};
