pub mod acl;
pub mod context;
pub mod level;
pub mod principal;
pub mod scope;

pub use acl::{AclAccess, AclAllow, AclEntry, AclTarget, PaclEntry, merge_and_sanitize_entries};
pub use context::{AccessContext, Method};
pub use level::{AccessLevel, AccessSpec, fix_allow_level};
pub use principal::{ANONYMOUS_IDENTIFIER, OrgRole, PUBLIC_IDENTIFIER, Principal};
