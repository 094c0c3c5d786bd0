//! Topic registry: the single source of truth for topic names
//!
//! Topics are declared once at boot with `define_framework` / `define_module`
//! and registered in a `TopicRegistry`. After boot the registry is read-mostly.

pub mod canonical;
pub mod descriptor;
pub mod registry;
pub mod validation;

pub use canonical::*;
pub use descriptor::{define_framework, define_module, TopicConfig, TopicDescriptor, TopicScope};
pub use registry::{
    global, init_global, AccessPolicy, DefaultAccessPolicy, TopicRegistry, TopicRole,
    CLIENT_MODULE,
};
pub use validation::{is_pattern, matches_pattern, validate_topic_name, validate_topic_pattern};
