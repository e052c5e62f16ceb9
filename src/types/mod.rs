pub mod decision;
pub mod pinning;
