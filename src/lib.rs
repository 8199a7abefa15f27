// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![crate_name = "lightning_routing"]

//! The routing core of a lightning node, in library form.
//!
//! This crate maintains a local view of the public channel graph, assembled from authenticated
//! gossip messages, and computes source-routed multi-hop payment paths over it. It deliberately
//! does no I/O of its own: wire framing, chain access, and broadcast fan-out are collaborators
//! the user wires in, which makes the core easy to drive from any event loop.
//!
//! The interesting pieces live in [`routing::gossip`] (the graph, gossip ingestion, failure
//! penalties and pruning) and [`routing::router`] (the amount-aware pathfinder).

#![cfg_attr(not(test), deny(missing_docs))]
#![forbid(unsafe_code)]

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

extern crate bitcoin;
#[cfg(test)]
extern crate hex;

#[macro_use]
pub mod util;
pub mod ln;
pub mod routing;
