mod access_policy;
mod attribute;

pub use access_policy::AccessPolicy;
pub use attribute::Attribute;
