//! Generated wire types for membership gossip.

/// Types generated from `proto/membership.proto`.
#[allow(missing_docs, clippy::all, clippy::pedantic)]
pub mod v1 {
    tonic::include_proto!("keygrid.cluster.v1");
}
