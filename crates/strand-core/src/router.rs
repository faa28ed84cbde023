//! Stream routing
//!
//! Wires each elementary stream the demuxer discovers into the matching
//! branch of the graph. Protected streams go through the decryptor when
//! one exists; any failure on that path undoes the partial decryptor link
//! and falls back to a direct link.
//!
//! Discovery events are delivered in order on a single channel, so the
//! router never runs concurrently with itself.

use crate::{
    graph::PipelineGraph,
    types::*,
};
use tracing::{debug, info, instrument, warn};

/// Why a discovered endpoint was not routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotOutput,
    NoCapability,
    UnknownKind,
}

/// Result of routing one discovered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Nothing playable; left unlinked
    Ignored(IgnoreReason),
    /// Linked through the decryptor
    Decrypted(StreamKind),
    /// Linked straight into the branch
    Direct(StreamKind),
    /// The branch input was already linked; nothing changed
    AlreadyRouted(StreamKind),
    /// Every link attempt failed; other streams are unaffected
    Unrouted(StreamKind),
}

impl RouteOutcome {
    pub fn is_routed(&self) -> bool {
        matches!(
            self,
            RouteOutcome::Decrypted(_) | RouteOutcome::Direct(_) | RouteOutcome::AlreadyRouted(_)
        )
    }
}

/// Routes discovered demuxer outputs into the graph
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamRouter;

impl StreamRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route one discovered endpoint, then tell the engine routing for it
    /// is settled.
    #[instrument(skip_all, fields(endpoint = %discovered.endpoint))]
    pub fn on_stream_discovered(
        &self,
        graph: &mut PipelineGraph,
        discovered: &DiscoveredEndpoint,
    ) -> RouteOutcome {
        let outcome = self.route(graph, discovered);
        graph.engine().finish_discovery(&discovered.endpoint);
        outcome
    }

    fn route(&self, graph: &mut PipelineGraph, discovered: &DiscoveredEndpoint) -> RouteOutcome {
        let endpoint = &discovered.endpoint;
        if !endpoint.is_output() {
            return RouteOutcome::Ignored(IgnoreReason::NotOutput);
        }

        let capability = match &discovered.capability {
            Some(caps) if !caps.is_empty() => caps.clone(),
            _ => {
                warn!("Discovered stream has no capability, ignoring");
                return RouteOutcome::Ignored(IgnoreReason::NoCapability);
            }
        };

        let stream = StreamDescriptor::from_capability(capability);
        let Some(target) = graph.topology().branch_input(stream.kind) else {
            warn!(caps = %stream.capability, "Unknown stream type, not wiring");
            return RouteOutcome::Ignored(IgnoreReason::UnknownKind);
        };

        info!(
            kind = %stream.kind,
            protected = stream.content_protected,
            caps = %stream.capability.media_type,
            "Stream discovered"
        );

        if stream.content_protected {
            match graph.topology().decryptor.clone() {
                Some(decryptor) => {
                    if self.route_through_decryptor(graph, endpoint, &decryptor.input(), &decryptor.output(), &target) {
                        return RouteOutcome::Decrypted(stream.kind);
                    }
                    warn!(kind = %stream.kind, "Decryptor path failed, falling back to direct link");
                }
                None => {
                    info!(kind = %stream.kind, "No decryptor available, linking protected stream directly");
                }
            }
        }

        match graph.link(endpoint, &target) {
            LinkOutcome::Linked => RouteOutcome::Direct(stream.kind),
            LinkOutcome::AlreadyLinked => {
                debug!(kind = %stream.kind, "Branch already linked");
                RouteOutcome::AlreadyRouted(stream.kind)
            }
            LinkOutcome::Failed(code) => {
                warn!(kind = %stream.kind, code = %code, "Stream left unrouted");
                RouteOutcome::Unrouted(stream.kind)
            }
        }
    }

    /// endpoint → decryptor → branch. True once both hops are in place.
    fn route_through_decryptor(
        &self,
        graph: &mut PipelineGraph,
        endpoint: &Endpoint,
        decryptor_in: &Endpoint,
        decryptor_out: &Endpoint,
        target: &Endpoint,
    ) -> bool {
        if let Err(e) = graph.ensure_decryptor_ready() {
            warn!(error = %e, "Decryptor did not accept Ready");
        }

        let first_hop = match graph.link(endpoint, decryptor_in) {
            LinkOutcome::Linked => true,
            LinkOutcome::AlreadyLinked => graph.peer_of(decryptor_in) == Some(endpoint),
            LinkOutcome::Failed(_) => false,
        };
        if !first_hop {
            return false;
        }

        let second_hop = match graph.link(decryptor_out, target) {
            LinkOutcome::Linked => true,
            LinkOutcome::AlreadyLinked => graph.peer_of(target) == Some(decryptor_out),
            LinkOutcome::Failed(_) => false,
        };
        if !second_hop {
            // Free the endpoint for the direct link
            if !graph.unlink(endpoint, decryptor_in) {
                warn!("Could not detach stream from decryptor");
            }
        }
        second_hop
    }
}
