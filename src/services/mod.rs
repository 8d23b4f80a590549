pub mod backend;
pub mod browser;
pub mod folders;
pub mod gateway;
pub mod local_backend;
pub mod preview_cache;
pub mod rest_backend;

#[cfg(test)]
pub(crate) mod testing;
