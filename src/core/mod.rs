pub mod codec;
pub mod events;
pub mod model;
pub mod playlist;
pub mod resolver;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;
