//! Event-loop adapters for [`AsyncClusterClient`](crate::AsyncClusterClient).

pub mod tokio;
