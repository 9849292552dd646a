//! Holon networking layer placeholder.
//!
//! Gossip transport, peer discovery, and wire framing around
//! [`holon_core::routing::RoutingTable`] and [`holon_core::messages`] live
//! here; neither is implemented in this pass.

// TODO: libp2p swarm wiring (gossipsub for tx/block propagation, kad for
// bootstrap, noise/yamux for transport security).
