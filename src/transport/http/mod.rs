pub mod api;
pub mod cli;
pub mod driver;

#[cfg(test)]
pub(crate) mod mock_server;
