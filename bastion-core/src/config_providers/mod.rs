mod file;

pub use file::{ConfigIdentitySource, PolicyAccessChecker, StaticAppDirectory, StaticClusterRegistry};
