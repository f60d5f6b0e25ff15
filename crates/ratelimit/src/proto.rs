//! Generated wire types for rate-limit forwarding and gossip.

/// Types generated from `proto/ratelimit.proto`.
#[allow(missing_docs, clippy::all, clippy::pedantic)]
pub mod v1 {
    tonic::include_proto!("keygrid.ratelimit.v1");
}
