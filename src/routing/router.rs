// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The router finds multi-hop payment paths over the channel graph.
//!
//! Because each hop charges a fee proportional to the amount it forwards, an edge's weight
//! depends on how much is flowing through it, which plain shortest-path algorithms cannot
//! express. We instead run a Bellman-Ford variant which keeps, per node, the best known state
//! *for every path length* up to [`ROUTING_MAX_HOPS`], and search backwards from the payment's
//! destination so the exact delivered amount threads through the fee calculations.

use bitcoin::hashes::siphash24;
use bitcoin::secp256k1::PublicKey;

use crate::ln::msgs::{ErrorAction, LightningError};
use crate::routing::gossip::{BroadcastStore, ChannelUpdateInfo, NetworkGraph, NodeId, ReadOnlyNetworkGraph, MAX_PROPORTIONAL_FEE};
use crate::util::logger::Logger;

use std::collections::HashMap;
use std::convert::TryInto;
use std::ops::Deref;
use std::time::{SystemTime, UNIX_EPOCH};

/// The maximum number of hops a route may have.
pub const ROUTING_MAX_HOPS: usize = 20;

/// For overflow avoidance, we never deal with amounts of 2^40 millisatoshi or more.
pub const MAX_MSATOSHI: u64 = 1 << 40;

/// Used to normalize a caller-supplied risk factor into per-block, per-millisatoshi units.
pub const BLOCKS_PER_YEAR: u64 = 52596;

// Too big to reach, but doesn't overflow if added.
const INFINITE: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// A hop in a route
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteHop {
	/// The node this hop forwards to.
	pub node_id: NodeId,
	/// The channel that should be used from the previous hop to reach this node.
	pub short_channel_id: u64,
	/// The amount this hop's node receives, in millisatoshi. For the last hop this is the amount
	/// delivered to the destination; for earlier hops it additionally carries the fees of the
	/// hops that follow.
	pub amount_msat: u64,
	/// The CLTV value this hop's HTLC must expire at, in blocks in excess of the current block
	/// height. For the last hop this is the requested final CLTV delta.
	pub cltv_expiry: u32,
}

/// A route directs a payment from the sender (us) to the recipient, over one or more hops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
	/// The hops to take, NOT INCLUDING our own node, in forward order; the last hop is the
	/// destination. Always at least length one.
	pub hops: Vec<RouteHop>,
	/// The fees the sender pays on top of the delivered amount, in millisatoshi. The sender pays
	/// itself no fee for the first channel.
	pub total_fee_msat: u64,
}

#[derive(Clone, Copy)]
struct RouteSlot {
	total_msat: u64,
	risk_msat: u64,
	prev_channel: Option<u64>,
}

const EMPTY_SLOT: RouteSlot = RouteSlot { total_msat: INFINITE, risk_msat: 0, prev_channel: None };

/// The fee to forward `msat` over the given direction of a channel.
fn connection_fee(half: &ChannelUpdateInfo, msat: u64) -> u64 {
	debug_assert!(msat < MAX_MSATOSHI);
	debug_assert!(half.fees.proportional_millionths < MAX_PROPORTIONAL_FEE);

	let fee = (half.fees.proportional_millionths as u64) * msat / 1_000_000;
	// This can't overflow: base_msat is a u32
	half.fees.base_msat as u64 + fee
}

/// Risk of passing through this channel. We insert a tiny constant here in order to prefer
/// shorter routes, all things equal.
fn risk_fee(amount: u64, delay: u32, riskfactor: f64) -> u64 {
	1 + (amount as f64 * delay as f64 * riskfactor) as u64
}

/// `riskfactor` is already scaled to per-block, per-msat units here. Returns the channel list
/// from `source` to `destination` in forward order, plus the total fee along it.
fn find_route<L: Deref>(
	network: &ReadOnlyNetworkGraph, source: &NodeId, destination: &NodeId, amount_msat: u64,
	riskfactor: f64, fuzz: f64, seed: &[u8; 16], now: u64, logger: &L,
) -> Result<(Vec<u64>, u64), LightningError> where L::Target: Logger {
	if source == destination {
		return Err(LightningError {
			err: "Refusing to create an empty route to ourselves".to_owned(),
			action: ErrorAction::IgnoreError,
		});
	}
	if amount_msat >= MAX_MSATOSHI {
		return Err(LightningError {
			err: "Cannot route amounts of 2^40 millisatoshi or more".to_owned(),
			action: ErrorAction::IgnoreError,
		});
	}

	let nodes = network.nodes();
	let channels = network.channels();
	if !nodes.contains_key(destination) {
		return Err(LightningError {
			err: "Cannot route to unknown node".to_owned(),
			action: ErrorAction::IgnoreError,
		});
	}
	if !nodes.contains_key(source) {
		return Err(LightningError {
			err: "Cannot route from unknown node".to_owned(),
			action: ErrorAction::IgnoreError,
		});
	}

	let fuzz_key_0 = u64::from_le_bytes(seed[0..8].try_into().expect("8 byte slice"));
	let fuzz_key_1 = u64::from_le_bytes(seed[8..16].try_into().expect("8 byte slice"));

	// We search backwards: the destination is the search source, since we know the amount it
	// must receive and need to derive how much we have to send.
	let mut slots: HashMap<NodeId, [RouteSlot; ROUTING_MAX_HOPS + 1]> = HashMap::with_capacity(nodes.len());
	for node_id in nodes.keys() {
		slots.insert(*node_id, [EMPTY_SLOT; ROUTING_MAX_HOPS + 1]);
	}
	slots.get_mut(destination).expect("inserted above")[0].total_msat = amount_msat;

	// Bellman-Ford, but keeping a value for every path length: an edge's fee depends on the
	// amount entering it, so path lengths cannot share one distance value.
	for _ in 0..ROUTING_MAX_HOPS {
		for (node_id, node) in nodes.iter() {
			let node_slots = slots[node_id];
			for scid in node.channels.iter() {
				let chan = channels.get(scid).expect("Node listed a channel we don't have");
				let (half, from_node) = chan.as_directed_to(node_id).expect("Node listed a channel it is no party to");
				if !half.is_routable(now) {
					continue;
				}
				let fee_scale = if fuzz != 0.0 {
					// Scale this channel's fee by a factor in [1-fuzz, 1+fuzz], stable within
					// this call and distinct across seeds.
					let hash = siphash24::Hash::hash_with_keys(fuzz_key_0, fuzz_key_1, &scid.to_be_bytes());
					1.0 + (2.0 * fuzz * hash.as_u64() as f64 / u64::MAX as f64) - fuzz
				} else {
					1.0
				};
				let from_node = *from_node;
				let from_slots = slots.get_mut(&from_node).expect("inserted above");
				for hops in 0..ROUTING_MAX_HOPS {
					if node_slots[hops].total_msat == INFINITE {
						continue;
					}
					let fee = (connection_fee(half, node_slots[hops].total_msat) as f64 * fee_scale) as u64;
					let risk = node_slots[hops].risk_msat
						+ risk_fee(node_slots[hops].total_msat + fee, half.cltv_expiry_delta, riskfactor);
					if node_slots[hops].total_msat.saturating_add(fee).saturating_add(risk) >= MAX_MSATOSHI {
						continue;
					}
					if node_slots[hops].total_msat + fee + risk
						< from_slots[hops + 1].total_msat + from_slots[hops + 1].risk_msat
					{
						from_slots[hops + 1] = RouteSlot {
							total_msat: node_slots[hops].total_msat + fee,
							risk_msat: risk,
							prev_channel: Some(*scid),
						};
					}
				}
			}
		}
	}

	let source_slots = &slots[source];
	let mut best = 0;
	for hops in 1..=ROUTING_MAX_HOPS {
		if source_slots[hops].total_msat < source_slots[best].total_msat {
			best = hops;
		}
	}
	if source_slots[best].total_msat >= INFINITE {
		log_trace!(logger, "find_route: no route to {}", destination);
		return Err(LightningError {
			err: "Failed to find a path to the given destination".to_owned(),
			action: ErrorAction::IgnoreError,
		});
	}

	// We don't charge ourselves a fee for the first channel, so the fee is whatever the node
	// after us receives, less the delivered amount.
	let first_channel = source_slots[best].prev_channel.expect("reachable slot must have a predecessor");
	let second_node = channels.get(&first_channel).expect("find_route picked a channel we don't have")
		.other_node(source).expect("predecessor channel must connect to its node");
	let total_fee = slots[second_node][best - 1].total_msat - amount_msat;

	let mut route = Vec::with_capacity(best);
	let mut cur = *source;
	for i in 0..best {
		let scid = slots[&cur][best - i].prev_channel.expect("walked off the route");
		route.push(scid);
		cur = *channels.get(&scid).expect("route lists a channel we don't have")
			.other_node(&cur).expect("route channel must connect to the walk");
	}
	assert_eq!(cur, *destination);

	Ok((route, total_fee))
}

/// Gets a route from `source` (the payer) to `destination` for `final_value_msat` millisatoshi.
///
/// `riskfactor` prices time-lock risk in per-year units and is normalized internally; higher
/// values prefer routes with smaller CLTV deltas over cheaper ones. If `fuzz` is non-zero, each
/// channel's effective fee is deterministically scaled by up to `±fuzz` based on `seed`, so that
/// repeated calls with distinct seeds may explore distinct ties while a single call stays
/// consistent.
///
/// The returned hops exclude the payer itself: the first hop describes what the first forwarding
/// node receives, the last hop what the destination receives (`final_value_msat`, expiring
/// `final_cltv` blocks past the current height).
pub fn get_route<B: Deref, L: Deref, GL: Deref>(
	graph: &NetworkGraph<B, L>, source: &PublicKey, destination: &PublicKey,
	final_value_msat: u64, riskfactor: f64, final_cltv: u32, fuzz: f64, seed: &[u8; 16],
	logger: GL,
) -> Result<Route, LightningError>
where B::Target: BroadcastStore, L::Target: Logger, GL::Target: Logger {
	let network = graph.read_only();
	let source = NodeId::from_pubkey(source);
	let destination = NodeId::from_pubkey(destination);
	// One clock read up front; the relaxation loop must not keep calling into the OS.
	let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_secs();

	let riskfactor = riskfactor / BLOCKS_PER_YEAR as f64 / 10000.0;
	let (route, path_fee) = find_route(&network, &source, &destination, final_value_msat, riskfactor, fuzz, seed, now, &logger)?;

	// Fees and CLTVs must be calculated backwards along the route: each hop forwards the amounts
	// of all the hops behind it, plus their fees.
	let channels = network.channels();
	let mut hops = Vec::with_capacity(route.len());
	let mut amount_msat = final_value_msat;
	let mut cltv_expiry = final_cltv;
	let mut cur = destination;
	for scid in route.iter().rev() {
		let chan = channels.get(scid).expect("find_route returned a channel we don't have");
		let (half, from_node) = chan.as_directed_to(&cur).expect("find_route returned a broken walk");
		hops.push(RouteHop {
			node_id: cur,
			short_channel_id: *scid,
			amount_msat,
			cltv_expiry,
		});
		amount_msat += connection_fee(half, amount_msat);
		cltv_expiry += half.cltv_expiry_delta;
		cur = *from_node;
	}
	assert_eq!(cur, source);
	hops.reverse();

	// Note that with fuzzing the path may have been *chosen* using perturbed fees, but the
	// amounts we actually forward, and therefore the fee we report, always use the real ones.
	let total_fee_msat = hops.first().expect("route is never empty").amount_msat - final_value_msat;
	log_trace!(logger, "get_route: {} hops to {}, fee {} msat (path searched at {})",
		hops.len(), destination, total_fee_msat, path_fee);
	Ok(Route { hops, total_fee_msat })
}

#[cfg(test)]
mod tests {
	use crate::routing::gossip::{NetworkGraph, NodeId};
	use crate::routing::router::{get_route, RouteHop, MAX_MSATOSHI, ROUTING_MAX_HOPS};
	use crate::routing::test_utils::{get_channel_script, get_signed_channel_announcement, get_signed_channel_update, three_sorted_keys};
	use crate::util::test_utils::{TestBroadcastStore, TestLogger};

	use bitcoin::network::constants::Network;
	use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};

	use std::time::{SystemTime, UNIX_EPOCH};

	const TEST_PRUNE_TIMEOUT: u64 = 60 * 60 * 24 * 14;

	fn now() -> u32 {
		SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_secs() as u32
	}

	fn create_graph<'a>(broadcast: &'a TestBroadcastStore, logger: &'a TestLogger)
	-> (Secp256k1<All>, NetworkGraph<&'a TestBroadcastStore, &'a TestLogger>) {
		let secp_ctx = Secp256k1::new();
		let local_id = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[99; 32]).unwrap());
		(secp_ctx, NetworkGraph::new(Network::Testnet, local_id, TEST_PRUNE_TIMEOUT, broadcast, logger))
	}

	/// Announces and confirms a channel between the given keys, which must already be in
	/// `node_one`/`node_two` order.
	fn open_channel(
		graph: &NetworkGraph<&TestBroadcastStore, &TestLogger>, secp_ctx: &Secp256k1<All>,
		short_channel_id: u64, node_1_key: &SecretKey, node_2_key: &SecretKey,
	) {
		let announcement = get_signed_channel_announcement(
			|unsigned| unsigned.short_channel_id = short_channel_id, node_1_key, node_2_key, secp_ctx);
		graph.handle_channel_announcement(&announcement).unwrap();
		graph.handle_funding_confirmation(short_channel_id, 100_000_000, &get_channel_script(secp_ctx));
	}

	/// Sets the policy of one direction of a channel. `key` must be the direction's source node.
	fn set_channel_policy(
		graph: &NetworkGraph<&TestBroadcastStore, &TestLogger>, secp_ctx: &Secp256k1<All>,
		short_channel_id: u64, key: &SecretKey, direction: u16, timestamp: u32,
		base_msat: u32, proportional_millionths: u32, cltv_expiry_delta: u16,
	) {
		let update = get_signed_channel_update(|unsigned| {
			unsigned.short_channel_id = short_channel_id;
			unsigned.flags = direction;
			unsigned.timestamp = timestamp;
			unsigned.htlc_minimum_msat = 0;
			unsigned.fee_base_msat = base_msat;
			unsigned.fee_proportional_millionths = proportional_millionths;
			unsigned.cltv_expiry_delta = cltv_expiry_delta;
		}, key, secp_ctx);
		graph.handle_channel_update(&update).unwrap();
	}

	/// The A - B - C line of the two-hop tests: A-B charges 0 + 0.1%, B-C charges 1000 msat
	/// flat, every direction has a 10 block delta.
	fn build_two_hop_graph<'a>(broadcast: &'a TestBroadcastStore, logger: &'a TestLogger)
	-> (Secp256k1<All>, NetworkGraph<&'a TestBroadcastStore, &'a TestLogger>, SecretKey, SecretKey, SecretKey) {
		let (secp_ctx, graph) = create_graph(broadcast, logger);
		let timestamp = now();
		let (key_a, key_b, key_c) = three_sorted_keys(&secp_ctx);
		open_channel(&graph, &secp_ctx, 1, &key_a, &key_b);
		open_channel(&graph, &secp_ctx, 2, &key_b, &key_c);
		set_channel_policy(&graph, &secp_ctx, 1, &key_a, 0, timestamp, 0, 1000, 10);
		set_channel_policy(&graph, &secp_ctx, 1, &key_b, 1, timestamp, 0, 1000, 10);
		set_channel_policy(&graph, &secp_ctx, 2, &key_b, 0, timestamp, 1000, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 2, &key_c, 1, timestamp, 1000, 0, 10);
		(secp_ctx, graph, key_a, key_b, key_c)
	}

	#[test]
	fn two_hop_route_amounts_and_cltvs() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph, key_a, key_b, key_c) = build_two_hop_graph(&broadcast, &logger);
		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_b = PublicKey::from_secret_key(&secp_ctx, &key_b);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);

		let route = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).unwrap();

		// B forwards 1_000_000 msat to C and charges its flat 1000 msat for the B-C channel; A
		// pays itself nothing for the first hop.
		assert_eq!(route.hops, vec![
			RouteHop { node_id: NodeId::from_pubkey(&node_b), short_channel_id: 1, amount_msat: 1_001_000, cltv_expiry: 19 },
			RouteHop { node_id: NodeId::from_pubkey(&node_c), short_channel_id: 2, amount_msat: 1_000_000, cltv_expiry: 9 },
		]);
		assert_eq!(route.total_fee_msat, 1_000);
	}

	#[test]
	fn route_request_sanity_checks() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph, key_a, _key_b, key_c) = build_two_hop_graph(&broadcast, &logger);
		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);
		let stranger = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[77; 32]).unwrap());

		match get_route(&graph, &node_a, &node_a, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Refusing to create an empty route to ourselves"),
		};
		match get_route(&graph, &node_a, &node_c, MAX_MSATOSHI, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Cannot route amounts of 2^40 millisatoshi or more"),
		};
		match get_route(&graph, &node_a, &stranger, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Cannot route to unknown node"),
		};
		match get_route(&graph, &stranger, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Cannot route from unknown node"),
		};
	}

	#[test]
	fn disabled_direction_has_no_route() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph, key_a, key_b, key_c) = build_two_hop_graph(&broadcast, &logger);
		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);

		// An update advertising a proportional fee of 2^24 ppm forces the direction inactive.
		set_channel_policy(&graph, &secp_ctx, 2, &key_b, 0, now() + 10, 1000, 1 << 24, 10);
		match get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Failed to find a path to the given destination"),
		};
	}

	#[test]
	fn unroutable_direction_is_skipped() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph, key_a, _key_b, key_c) = build_two_hop_graph(&broadcast, &logger);
		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);

		assert!(get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).is_ok());
		// The penalty window starts now and the pathfinder's clock is the same wall clock, so
		// the route vanishes immediately.
		graph.mark_channel_unroutable(2);
		match get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Failed to find a path to the given destination"),
		};
	}

	#[test]
	fn picks_cheaper_intermediate_hop() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph) = create_graph(&broadcast, &logger);
		let timestamp = now();

		// a - b - c and a - d - c, where forwarding through d costs 5000 msat but through b only
		// 10 msat.
		let mut keys = vec![
			SecretKey::from_slice(&[42; 32]).unwrap(),
			SecretKey::from_slice(&[41; 32]).unwrap(),
			SecretKey::from_slice(&[40; 32]).unwrap(),
			SecretKey::from_slice(&[39; 32]).unwrap(),
		];
		keys.sort_by_key(|key| PublicKey::from_secret_key(&secp_ctx, key).serialize());
		let (key_a, key_b, key_c, key_d) = (keys[0].clone(), keys[1].clone(), keys[2].clone(), keys[3].clone());

		open_channel(&graph, &secp_ctx, 1, &key_a, &key_b);
		open_channel(&graph, &secp_ctx, 2, &key_b, &key_c);
		open_channel(&graph, &secp_ctx, 3, &key_a, &key_d);
		open_channel(&graph, &secp_ctx, 4, &key_c, &key_d);
		// Directions toward c's side of the graph.
		set_channel_policy(&graph, &secp_ctx, 1, &key_a, 0, timestamp, 100, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 2, &key_b, 0, timestamp, 10, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 3, &key_a, 0, timestamp, 100, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 4, &key_d, 1, timestamp, 5000, 0, 10);

		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);
		let route = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).unwrap();
		assert_eq!(route.hops.len(), 2);
		assert_eq!(route.hops[0].node_id, NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, &key_b)));
		assert_eq!(route.total_fee_msat, 10);
	}

	#[test]
	fn equal_fee_prefers_shorter_route() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph) = create_graph(&broadcast, &logger);
		let timestamp = now();

		let (key_a, key_b, key_c) = three_sorted_keys(&secp_ctx);
		// Direct a - c costs exactly what a - b - c costs in fees; equal totals leave the
		// earlier, shorter hop count selected.
		open_channel(&graph, &secp_ctx, 1, &key_a, &key_b);
		open_channel(&graph, &secp_ctx, 2, &key_b, &key_c);
		open_channel(&graph, &secp_ctx, 3, &key_a, &key_c);
		set_channel_policy(&graph, &secp_ctx, 1, &key_a, 0, timestamp, 0, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 2, &key_b, 0, timestamp, 1000, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 3, &key_a, 0, timestamp, 1000, 0, 10);

		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);
		let route = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).unwrap();
		assert_eq!(route.hops.len(), 1);
		assert_eq!(route.hops[0].short_channel_id, 3);
		assert_eq!(route.hops[0].amount_msat, 1_000_000);
		assert_eq!(route.total_fee_msat, 0);
	}

	#[test]
	fn risk_factor_avoids_long_delays() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph) = create_graph(&broadcast, &logger);
		let timestamp = now();

		// Two two-hop paths a - b - c and a - d - c. Forwarding through d is 1000 msat cheaper,
		// but the d - c channel demands a two-week time lock where everything else asks for 10
		// blocks.
		let mut keys = vec![
			SecretKey::from_slice(&[42; 32]).unwrap(),
			SecretKey::from_slice(&[41; 32]).unwrap(),
			SecretKey::from_slice(&[40; 32]).unwrap(),
			SecretKey::from_slice(&[39; 32]).unwrap(),
		];
		keys.sort_by_key(|key| PublicKey::from_secret_key(&secp_ctx, key).serialize());
		let (key_a, key_b, key_c, key_d) = (keys[0].clone(), keys[1].clone(), keys[2].clone(), keys[3].clone());

		open_channel(&graph, &secp_ctx, 1, &key_a, &key_b);
		open_channel(&graph, &secp_ctx, 2, &key_b, &key_c);
		open_channel(&graph, &secp_ctx, 3, &key_a, &key_d);
		open_channel(&graph, &secp_ctx, 4, &key_c, &key_d);
		set_channel_policy(&graph, &secp_ctx, 1, &key_a, 0, timestamp, 0, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 2, &key_b, 0, timestamp, 2000, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 3, &key_a, 0, timestamp, 0, 0, 10);
		set_channel_policy(&graph, &secp_ctx, 4, &key_d, 1, timestamp, 1000, 0, 2016);

		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);

		// With risk priced at zero, the cheaper path through d wins.
		let route = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).unwrap();
		assert_eq!(route.hops[0].node_id, NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, &key_d)));
		assert_eq!(route.total_fee_msat, 1000);

		// Pricing in the time-lock makes the huge delta cost more than the 1000 msat saved.
		let route = get_route(&graph, &node_a, &node_c, 1_000_000, 1000.0, 9, 0.0, &[0; 16], &logger).unwrap();
		assert_eq!(route.hops[0].node_id, NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, &key_b)));
		assert_eq!(route.total_fee_msat, 2000);
	}

	#[test]
	fn fuzz_is_deterministic_per_seed() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph, key_a, _key_b, key_c) = build_two_hop_graph(&broadcast, &logger);
		let node_a = PublicKey::from_secret_key(&secp_ctx, &key_a);
		let node_c = PublicKey::from_secret_key(&secp_ctx, &key_c);

		let seed = [7; 16];
		let first = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.05, &seed, &logger).unwrap();
		let second = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.05, &seed, &logger).unwrap();
		assert_eq!(first, second);
		// Reported amounts always reflect the real, unperturbed fees.
		assert_eq!(first.total_fee_msat, 1_000);

		let third = get_route(&graph, &node_a, &node_c, 1_000_000, 0.0, 9, 0.05, &[8; 16], &logger).unwrap();
		assert_eq!(third.total_fee_msat, 1_000);
	}

	#[test]
	fn routes_are_capped_at_max_hops() {
		let broadcast = TestBroadcastStore::new();
		let logger = TestLogger::new();
		let (secp_ctx, graph) = create_graph(&broadcast, &logger);
		let timestamp = now();

		// A line of 22 nodes: 21 hops to the far end (unreachable), 20 to the one before it.
		let mut keys = Vec::new();
		for i in 1..=22u8 {
			keys.push(SecretKey::from_slice(&[i; 32]).unwrap());
		}
		keys.sort_by_key(|key| PublicKey::from_secret_key(&secp_ctx, key).serialize());
		for i in 0..21 {
			open_channel(&graph, &secp_ctx, i as u64 + 1, &keys[i], &keys[i + 1]);
			// Direction toward the far end of the line.
			set_channel_policy(&graph, &secp_ctx, i as u64 + 1, &keys[i], 0, timestamp, 0, 0, 0);
		}

		let first = PublicKey::from_secret_key(&secp_ctx, &keys[0]);
		let reachable = PublicKey::from_secret_key(&secp_ctx, &keys[20]);
		let unreachable = PublicKey::from_secret_key(&secp_ctx, &keys[21]);

		let route = get_route(&graph, &first, &reachable, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger).unwrap();
		assert_eq!(route.hops.len(), ROUTING_MAX_HOPS);
		assert_eq!(route.total_fee_msat, 0);

		match get_route(&graph, &first, &unreachable, 1_000_000, 0.0, 9, 0.0, &[0; 16], &logger) {
			Ok(_) => panic!(),
			Err(e) => assert_eq!(e.err, "Failed to find a path to the given destination"),
		};
	}
}
