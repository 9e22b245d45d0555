pub mod aws;
pub mod cloud;
pub mod errors;
pub mod host;
pub mod provision;
pub mod reconcile;
pub mod remote;
pub mod spec;

#[cfg(test)]
pub(crate) mod fakes;
