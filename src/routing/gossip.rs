// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`NetworkGraph`] stores the network gossip: who has channels with whom, at what fees, and
//! which announcements are still waiting on an on-chain funding check.
//!
//! Channel announcements don't enter the graph directly. They are validated, staged as pending,
//! and only become public channels once an on-chain collaborator confirms the funding output is
//! unspent and pays to the announced keys. Updates and node announcements which race ahead of
//! their channel's confirmation are deferred alongside the pending entry rather than dropped.

use bitcoin::secp256k1::constants::PUBLIC_KEY_SIZE;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::secp256k1;

use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::hashes::Hash;
use bitcoin::hash_types::BlockHash;

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::blockdata::script::Script;
use bitcoin::network::constants::Network;

use crate::ln::chan_utils::make_funding_redeemscript;
use crate::ln::msgs::{self, ChannelAnnouncement, ChannelUpdate, NodeAnnouncement};
use crate::ln::msgs::{DecodeError, ErrorAction, LightningError, NetAddress};
use crate::ln::msgs::{CHANNEL_ANNOUNCEMENT_TYPE, CHANNEL_UPDATE_TYPE, NODE_ANNOUNCEMENT_TYPE};
use crate::util::logger::{Level, Logger};
use crate::util::ser::{Readable, Writeable, Writer};

use std::collections::btree_map::Entry as BtreeEntry;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::ops::Deref;
use std::sync::{Mutex, RwLock, RwLockReadGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{cmp, fmt, io};

/// How long a half-channel stays unroutable after a non-permanent routing failure, in seconds.
pub const UNROUTABLE_PENALTY_SECS: u64 = 20;

/// Proportional fee must be less than 2^24 parts-per-million, so the pathfinder's fee arithmetic
/// never overflows. Updates advertising more get their direction disabled instead.
pub const MAX_PROPORTIONAL_FEE: u32 = 1 << 24;

/// The UPDATE bit of an onion failure code: a fresher channel_update is enclosed.
pub const FAILCODE_UPDATE: u16 = 0x1000;
/// The NODE bit of an onion failure code: the failure concerns the node, not a single channel.
pub const FAILCODE_NODE: u16 = 0x2000;
/// The PERM bit of an onion failure code: the failure is permanent.
pub const FAILCODE_PERM: u16 = 0x4000;

/// Represents the compressed public key of a node
#[derive(Clone, Copy)]
pub struct NodeId([u8; PUBLIC_KEY_SIZE]);

impl NodeId {
	/// Create a new NodeId from a public key
	pub fn from_pubkey(pubkey: &PublicKey) -> Self {
		NodeId(pubkey.serialize())
	}

	/// Create a new NodeId from a slice of bytes
	pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
		if bytes.len() != PUBLIC_KEY_SIZE {
			return Err(DecodeError::InvalidValue);
		}
		let mut data = [0; PUBLIC_KEY_SIZE];
		data.copy_from_slice(bytes);
		Ok(NodeId(data))
	}

	/// Get the public key slice from this NodeId
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "NodeId({})", log_bytes!(self.0))
	}
}
impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", log_bytes!(self.0))
	}
}

impl core::hash::Hash for NodeId {
	fn hash<H: core::hash::Hasher>(&self, hasher: &mut H) {
		self.0.hash(hasher);
	}
}

impl Eq for NodeId {}

impl PartialEq for NodeId {
	fn eq(&self, other: &Self) -> bool {
		self.0[..] == other.0[..]
	}
}

impl cmp::PartialOrd for NodeId {
	fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for NodeId {
	fn cmp(&self, other: &Self) -> cmp::Ordering {
		self.0[..].cmp(&other.0[..])
	}
}

impl Writeable for NodeId {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&self.0)?;
		Ok(())
	}
}

impl Readable for NodeId {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0; PUBLIC_KEY_SIZE];
		reader.read_exact(&mut buf)?;
		Ok(Self(buf))
	}
}

/// Fees for routing via a given channel or a node
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash)]
pub struct RoutingFees {
	/// Flat routing fee in millisatoshis.
	pub base_msat: u32,
	/// Liquidity-based routing fee in millionths of a routed amount.
	/// In other words, 10000 is 1%.
	pub proportional_millionths: u32,
}

/// The routing key under which the broadcast collaborator indexes a published gossip message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastTag {
	/// A channel_announcement, keyed by its short channel id.
	ChannelAnnouncement(u64),
	/// A channel_update, keyed by short channel id and direction.
	ChannelUpdate(u64, u16),
	/// A node_announcement, keyed by the subject node.
	NodeAnnouncement(NodeId),
}

/// The broadcast fan-out collaborator which relays our accepted gossip to peers.
///
/// The graph retains a slot index per published message (initially zero, meaning
/// "never published") so a newer message can replace its predecessor in the
/// broadcast queue rather than queueing behind it.
pub trait BroadcastStore {
	/// Stores `payload` for broadcast under a fresh slot written to `index`, dropping whatever
	/// message the previous value of `index` referred to. Returns whether a previous message was
	/// actually dropped.
	fn replace_broadcast(&self, index: &mut u64, message_type: u16, tag: BroadcastTag, payload: Vec<u8>) -> bool;
}

/// Details about one direction of a channel: its forwarding policy and liveness.
///
/// Both directions always exist, seeded inactive and half-aged, so that a channel whose direction
/// never sees an update is pruned one half-lifetime after its announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelUpdateInfo {
	/// Whether the channel can be currently used for payments (in this one direction), per its
	/// last update.
	pub enabled: bool,
	/// Seconds-since-epoch before which the pathfinder must skip this direction, set by the
	/// failure handler and cleared by any accepted update.
	pub unroutable_until: u64,
	/// When the last update to the channel direction was issued, seconds since epoch. Seeded to
	/// half the prune timeout in the past for directions which have never seen an update.
	pub last_update: u64,
	/// The difference in CLTV values that you must have when routing through this channel.
	pub cltv_expiry_delta: u32,
	/// The minimum value, which must be relayed to the next hop via the channel
	pub htlc_minimum_msat: u64,
	/// Fees charged when the channel is used for routing
	pub fees: RoutingFees,
	/// Most recent update for the channel received from the network
	/// Mostly redundant with the data we store in fields explicitly.
	/// Everything else is useful only for sending out for initial routing sync.
	pub last_update_message: Option<ChannelUpdate>,
	/// Broadcast-store slot of the last published update for this direction.
	pub(crate) update_broadcast_index: u64,
}

impl ChannelUpdateInfo {
	fn never_updated(seed_timestamp: u64) -> Self {
		ChannelUpdateInfo {
			enabled: false,
			unroutable_until: 0,
			last_update: seed_timestamp,
			cltv_expiry_delta: 0,
			htlc_minimum_msat: 0,
			fees: RoutingFees { base_msat: 0, proportional_millionths: 0 },
			last_update_message: None,
			update_broadcast_index: 0,
		}
	}

	/// Whether the pathfinder may send payments through this direction at the given time.
	pub fn is_routable(&self, now: u64) -> bool {
		self.enabled && self.unroutable_until < now
	}
}

impl fmt::Display for ChannelUpdateInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "last_update {}, enabled {}, cltv_expiry_delta {}, htlc_minimum_msat {}, fees {:?}",
			self.last_update, self.enabled, self.cltv_expiry_delta, self.htlc_minimum_msat, self.fees)?;
		Ok(())
	}
}

/// Details about a channel (both directions).
///
/// The endpoints are stored in canonical order: `node_one` is whichever has the lexicographically
/// smaller serialized public key, so the direction bit of an update (bit 0 of its flags) selects
/// `one_to_two` when unset and `two_to_one` when set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
	/// Source node of the first direction of a channel
	pub node_one: NodeId,
	/// Details about the first direction of a channel
	pub one_to_two: ChannelUpdateInfo,
	/// Source node of the second direction of a channel
	pub node_two: NodeId,
	/// Details about the second direction of a channel
	pub two_to_one: ChannelUpdateInfo,
	/// The channel capacity as seen on-chain. Zero until the funding output is confirmed.
	pub capacity_sats: u64,
	/// Whether this channel was observed on-chain via an announcement (public), as opposed to
	/// having been registered by the operator's own node. Local-only channels are never pruned.
	pub is_public: bool,
	/// The initial announcement of the channel, retained for later rebroadcast.
	pub announcement_message: Option<ChannelAnnouncement>,
	/// Broadcast-store slot of the published announcement.
	pub(crate) announcement_broadcast_index: u64,
}

impl ChannelInfo {
	fn new(node_one: NodeId, node_two: NodeId, seed_timestamp: u64) -> Self {
		debug_assert!(node_one < node_two);
		ChannelInfo {
			node_one,
			one_to_two: ChannelUpdateInfo::never_updated(seed_timestamp),
			node_two,
			two_to_one: ChannelUpdateInfo::never_updated(seed_timestamp),
			capacity_sats: 0,
			is_public: false,
			announcement_message: None,
			announcement_broadcast_index: 0,
		}
	}

	/// Returns the [`ChannelUpdateInfo`] for the direction implied by the given update flags
	/// (bit 0).
	pub fn directional_info(&self, direction: u8) -> &ChannelUpdateInfo {
		if direction & 1 == 0 { &self.one_to_two } else { &self.two_to_one }
	}

	/// Returns the direction flowing *to* the given `target` plus the node the traffic comes
	/// from, or `None` if `target` is not one of the channel's counterparties.
	pub fn as_directed_to(&self, target: &NodeId) -> Option<(&ChannelUpdateInfo, &NodeId)> {
		if target == &self.node_two {
			Some((&self.one_to_two, &self.node_one))
		} else if target == &self.node_one {
			Some((&self.two_to_one, &self.node_two))
		} else {
			None
		}
	}

	/// Returns the counterparty of `node_id` on this channel, or `None` if `node_id` is not an
	/// endpoint.
	pub fn other_node(&self, node_id: &NodeId) -> Option<&NodeId> {
		if node_id == &self.node_one {
			Some(&self.node_two)
		} else if node_id == &self.node_two {
			Some(&self.node_one)
		} else {
			None
		}
	}
}

impl fmt::Display for ChannelInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "node_one: {}, one_to_two: {}, node_two: {}, two_to_one: {}, capacity_sats: {}, public: {}",
			self.node_one, self.one_to_two, self.node_two, self.two_to_one, self.capacity_sats, self.is_public)?;
		Ok(())
	}
}

/// A user-defined name for a node, which may be used when displaying the node in a graph.
///
/// Since node aliases are provided by third parties, they are a potential avenue for injection
/// attacks. Care must be taken when processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAlias(pub [u8; 32]);

impl fmt::Display for NodeAlias {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		let first_null = self.0.iter().position(|b| *b == 0).unwrap_or(self.0.len());
		let bytes = self.0.split_at(first_null).0;
		use core::fmt::Write;
		for c in bytes.iter().map(|b| *b as char) {
			// Display printable ASCII characters
			let c = if c >= '\x20' && c <= '\x7e' { c } else { core::char::REPLACEMENT_CHARACTER };
			f.write_char(c)?;
		}
		Ok(())
	}
}

/// Information received in the latest node_announcement from this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAnnouncementInfo {
	/// When the last known update to the node state was issued.
	/// Value is opaque, as set in the announcement.
	pub last_update: u32,
	/// Color assigned to the node
	pub rgb: [u8; 3],
	/// Moniker assigned to the node.
	/// May be invalid or malicious (eg control chars),
	/// should not be exposed to the user.
	pub alias: NodeAlias,
	/// Internet-level addresses via which one can connect to the node
	pub addresses: Vec<NetAddress>,
	/// An initial announcement of the node
	/// Mostly redundant with the data we store in fields explicitly.
	/// Everything else is useful only for sending out for initial routing sync.
	pub announcement_message: Option<NodeAnnouncement>,
	/// Broadcast-store slot of the published announcement.
	pub(crate) broadcast_index: u64,
}

/// Details about a node in the network, known from the network announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
	/// All valid channels a node has announced
	pub channels: Vec<u64>,
	/// More information about a node from node_announcement.
	/// Optional because we store a Node entry after learning about it from
	/// a channel announcement, but before receiving a node announcement.
	pub announcement_info: Option<NodeAnnouncementInfo>,
}

impl fmt::Display for NodeInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, " channels: {:?}, announcement_info: {:?}", &self.channels[..], self.announcement_info)?;
		Ok(())
	}
}

/// A validated channel announcement waiting for its funding output to be checked on-chain.
struct PendingChannelAnnouncement {
	node_id_1: NodeId,
	node_id_2: NodeId,
	bitcoin_key_1: PublicKey,
	bitcoin_key_2: PublicKey,
	/// The raw announcement, republished on adoption.
	announcement: ChannelAnnouncement,
	/// Deferred updates, if we received them while waiting for this (one for each direction).
	updates: [Option<ChannelUpdate>; 2],
	/// Only ever replace a deferred update with a newer one.
	update_timestamps: [u32; 2],
}

/// A slot for a node referenced by a pending channel announcement, holding at most one deferred
/// node_announcement (newest wins) until the channel resolves.
struct PendingNodeAnnouncement {
	announcement: Option<NodeAnnouncement>,
	timestamp: u32,
}

impl PendingNodeAnnouncement {
	fn new() -> Self {
		PendingNodeAnnouncement { announcement: None, timestamp: 0 }
	}
}

/// Represents the network as nodes and channels between them
pub struct NetworkGraph<B: Deref, L: Deref> where B::Target: BroadcastStore, L::Target: Logger {
	secp_ctx: Secp256k1<secp256k1::VerifyOnly>,
	genesis_hash: BlockHash,
	local_id: NodeId,
	/// Public channels whose freshest direction is older than this many seconds get pruned.
	prune_timeout: u64,
	broadcast: B,
	logger: L,
	// Lock order: channels -> nodes
	channels: RwLock<BTreeMap<u64, ChannelInfo>>,
	nodes: RwLock<BTreeMap<NodeId, NodeInfo>>,
	// Lock order: pending_channels -> pending_nodes. Neither is ever taken with the graph locks
	// held.
	pending_channels: Mutex<BTreeMap<u64, PendingChannelAnnouncement>>,
	pending_nodes: Mutex<HashMap<NodeId, PendingNodeAnnouncement>>,
}

/// A read-only view of [`NetworkGraph`].
pub struct ReadOnlyNetworkGraph<'a> {
	channels: RwLockReadGuard<'a, BTreeMap<u64, ChannelInfo>>,
	nodes: RwLockReadGuard<'a, BTreeMap<NodeId, NodeInfo>>,
}

impl ReadOnlyNetworkGraph<'_> {
	/// Returns all known valid channels' short ids along with announced channel info.
	pub fn channels(&self) -> &BTreeMap<u64, ChannelInfo> {
		&*self.channels
	}

	/// Returns information on a channel with the given id.
	pub fn channel(&self, short_channel_id: u64) -> Option<&ChannelInfo> {
		self.channels.get(&short_channel_id)
	}

	/// Returns all known nodes' public keys along with announced node info.
	pub fn nodes(&self) -> &BTreeMap<NodeId, NodeInfo> {
		&*self.nodes
	}

	/// Returns information on a node with the given id.
	pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
		self.nodes.get(node_id)
	}

	/// Get network addresses by node id.
	/// Returns None if the requested node is completely unknown,
	/// or if node announcement for the node was never received.
	pub fn get_addresses(&self, pubkey: &PublicKey) -> Option<Vec<NetAddress>> {
		if let Some(node) = self.nodes.get(&NodeId::from_pubkey(&pubkey)) {
			if let Some(node_info) = node.announcement_info.as_ref() {
				return Some(node_info.addresses.clone());
			}
		}
		None
	}
}

macro_rules! secp_verify_sig {
	( $secp_ctx: expr, $msg: expr, $sig: expr, $pubkey: expr, $msg_type: expr ) => {
		match $secp_ctx.verify_ecdsa($msg, $sig, $pubkey) {
			Ok(_) => {},
			Err(_) => {
				return Err(LightningError {
					err: format!("Invalid signature on {} message", $msg_type),
					action: ErrorAction::IgnoreAndLog(Level::Trace),
				});
			},
		}
	};
}

macro_rules! get_pubkey_from_node_id {
	( $node_id: expr, $msg_type: expr ) => {
		PublicKey::from_slice($node_id.as_slice())
			.map_err(|_| LightningError {
				err: format!("Invalid public key on {} message", $msg_type),
				action: ErrorAction::IgnoreAndLog(Level::Trace),
			})?
	}
}

fn unix_time() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_secs()
}

fn hash_to_message(unsigned: &[u8]) -> Message {
	Message::from_slice(&Sha256dHash::hash(unsigned)[..]).expect("Hashes are 32 bytes")
}

impl<B: Deref, L: Deref> fmt::Display for NetworkGraph<B, L>
where B::Target: BroadcastStore, L::Target: Logger {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		writeln!(f, "Network map\n[Channels]")?;
		for (key, val) in self.channels.read().unwrap().iter() {
			writeln!(f, " {}: {}", key, val)?;
		}
		writeln!(f, "[Nodes]")?;
		for (&node_id, val) in self.nodes.read().unwrap().iter() {
			writeln!(f, " {}: {}", node_id, val)?;
		}
		Ok(())
	}
}

impl<B: Deref, L: Deref> NetworkGraph<B, L> where B::Target: BroadcastStore, L::Target: Logger {
	/// Creates a new, empty, network graph for the given chain.
	///
	/// `local_id` is the operator's own node id; confirmations of channels we are a party to are
	/// reported back from [`NetworkGraph::handle_funding_confirmation`]. Public channels whose
	/// both directions have gone `prune_timeout` seconds without an update are dropped by
	/// [`NetworkGraph::prune_stale_channels`].
	pub fn new(network: Network, local_id: PublicKey, prune_timeout: u64, broadcast: B, logger: L) -> NetworkGraph<B, L> {
		NetworkGraph {
			secp_ctx: Secp256k1::verification_only(),
			genesis_hash: genesis_block(network).header.block_hash(),
			local_id: NodeId::from_pubkey(&local_id),
			prune_timeout,
			broadcast,
			logger,
			channels: RwLock::new(BTreeMap::new()),
			nodes: RwLock::new(BTreeMap::new()),
			pending_channels: Mutex::new(BTreeMap::new()),
			pending_nodes: Mutex::new(HashMap::new()),
		}
	}

	/// Returns a read-only view of the network graph.
	pub fn read_only(&'_ self) -> ReadOnlyNetworkGraph<'_> {
		let channels = self.channels.read().unwrap();
		let nodes = self.nodes.read().unwrap();
		ReadOnlyNetworkGraph {
			channels,
			nodes,
		}
	}

	/// Validates a channel announcement and stages it until its funding output has been checked
	/// on-chain.
	///
	/// On success returns the short channel id the caller must look up on-chain, feeding the
	/// result to [`NetworkGraph::handle_funding_confirmation`]. The channel does not appear in
	/// the graph until then.
	pub fn handle_channel_announcement(&self, msg: &ChannelAnnouncement) -> Result<u64, LightningError> {
		let short_channel_id = msg.contents.short_channel_id;

		if msg.contents.node_id_1 == msg.contents.node_id_2 {
			return Err(LightningError {
				err: "Channel announcement node had a channel with itself".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		// Check if we know the channel already; no matter in what state, we stop here if yes.
		{
			let channels = self.channels.read().unwrap();
			if let Some(chan) = channels.get(&short_channel_id) {
				if chan.is_public {
					return Err(LightningError {
						err: "Already have public channel".to_owned(),
						action: ErrorAction::IgnoreDuplicateGossip,
					});
				}
			}
		}

		// We don't replace previous pending entries, since we might be validating that one and
		// think this one is OK!
		if self.pending_channels.lock().unwrap().contains_key(&short_channel_id) {
			return Err(LightningError {
				err: "Already have pending channel announcement".to_owned(),
				action: ErrorAction::IgnoreDuplicateGossip,
			});
		}

		if msg.contents.features.requires_unknown_bits() {
			return Err(LightningError {
				err: "Channel announcement required unknown feature bits".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		if msg.contents.chain_hash != self.genesis_hash {
			return Err(LightningError {
				err: "Channel announcement for unknown chain".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		let bitcoin_key_1 = get_pubkey_from_node_id!(msg.contents.bitcoin_key_1, "channel_announcement");
		let bitcoin_key_2 = get_pubkey_from_node_id!(msg.contents.bitcoin_key_2, "channel_announcement");

		let msg_hash = hash_to_message(&msg.contents.encode()[..]);
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.node_signature_1, &get_pubkey_from_node_id!(msg.contents.node_id_1, "channel_announcement"), "channel_announcement");
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.node_signature_2, &get_pubkey_from_node_id!(msg.contents.node_id_2, "channel_announcement"), "channel_announcement");
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.bitcoin_signature_1, &bitcoin_key_1, "channel_announcement");
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.bitcoin_signature_2, &bitcoin_key_2, "channel_announcement");

		log_gossip!(self.logger, "Received channel_announcement for channel {}", short_channel_id);

		// Add both endpoints to the pending node map so we can stash node_announcements while we
		// wait for the txout check.
		{
			let mut pending_channels = self.pending_channels.lock().unwrap();
			let mut pending_nodes = self.pending_nodes.lock().unwrap();
			pending_nodes.entry(msg.contents.node_id_1).or_insert_with(PendingNodeAnnouncement::new);
			pending_nodes.entry(msg.contents.node_id_2).or_insert_with(PendingNodeAnnouncement::new);
			pending_channels.insert(short_channel_id, PendingChannelAnnouncement {
				node_id_1: msg.contents.node_id_1,
				node_id_2: msg.contents.node_id_2,
				bitcoin_key_1,
				bitcoin_key_2,
				announcement: msg.clone(),
				updates: [None, None],
				update_timestamps: [0, 0],
			});
		}

		Ok(short_channel_id)
	}

	/// Resolves a staged channel announcement with the state of its funding output.
	///
	/// `outscript` is the scriptPubKey of the funding output, or empty if it is spent or unknown.
	/// Returns true iff the confirmed channel has our own node as one of its endpoints; false
	/// for everyone else's channels, for spent/mismatched outputs, and for short channel ids we
	/// have nothing staged for.
	pub fn handle_funding_confirmation(&self, short_channel_id: u64, satoshis: u64, outscript: &Script) -> bool {
		self.handle_funding_confirmation_with_time(short_channel_id, satoshis, outscript, unix_time())
	}

	/// As [`NetworkGraph::handle_funding_confirmation`], with the current unix time supplied by
	/// the caller. The time seeds the age of the new channel's never-updated directions.
	pub fn handle_funding_confirmation_with_time(&self, short_channel_id: u64, satoshis: u64, outscript: &Script, current_time: u64) -> bool {
		let pending = match self.pending_channels.lock().unwrap().remove(&short_channel_id) {
			Some(pending) => pending,
			None => return false,
		};

		if outscript.is_empty() {
			log_trace!(self.logger, "channel_announcement: no unspent txout for channel {}", short_channel_id);
			self.process_pending_node_announcements(&pending);
			return false;
		}

		let expected_script = make_funding_redeemscript(&pending.bitcoin_key_1, &pending.bitcoin_key_2).to_v0_p2wsh();
		if *outscript != expected_script {
			log_trace!(self.logger, "channel_announcement: txout for channel {} expected script {}, got {}",
				short_channel_id, log_bytes!(expected_script.as_bytes()), log_bytes!(outscript.as_bytes()));
			self.process_pending_node_announcements(&pending);
			return false;
		}

		{
			let mut channels = self.channels.write().unwrap();
			let mut nodes = self.nodes.write().unwrap();

			// The channel may already exist if it was registered as one of our own, non-public
			// channels via add_local_channel; normally we don't accept announcements for known
			// channels at all. See handle_channel_announcement.
			let chan = match channels.entry(short_channel_id) {
				BtreeEntry::Occupied(entry) => entry.into_mut(),
				BtreeEntry::Vacant(entry) => {
					let (node_one, node_two) = if pending.node_id_1 < pending.node_id_2 {
						(pending.node_id_1, pending.node_id_2)
					} else {
						(pending.node_id_2, pending.node_id_1)
					};
					// We haven't seen a channel_update yet: seed both directions halfway to prune
					// time, which should be older than any update we'd see.
					let seed_timestamp = current_time.saturating_sub(self.prune_timeout / 2);
					for node_id in [&node_one, &node_two].iter() {
						nodes.entry(**node_id).or_insert_with(|| NodeInfo {
							channels: Vec::new(),
							announcement_info: None,
						}).channels.push(short_channel_id);
					}
					entry.insert(ChannelInfo::new(node_one, node_two, seed_timestamp))
				},
			};

			chan.is_public = true;
			chan.capacity_sats = satoshis;
			chan.announcement_message = Some(pending.announcement.clone());

			let mut index = chan.announcement_broadcast_index;
			if self.broadcast.replace_broadcast(&mut index, CHANNEL_ANNOUNCEMENT_TYPE,
				BroadcastTag::ChannelAnnouncement(short_channel_id), pending.announcement.encode())
			{
				panic!("Announcement for channel {} was replaced on its first broadcast", short_channel_id);
			}
			chan.announcement_broadcast_index = index;
		}

		log_gossip!(self.logger, "Channel {} now public with capacity {} sat", short_channel_id, satoshis);

		// Did we have updates waiting? If so, apply now, direction 0 first.
		if let Some(ref update) = pending.updates[0] {
			let _ = self.handle_channel_update(update);
		}
		if let Some(ref update) = pending.updates[1] {
			let _ = self.handle_channel_update(update);
		}

		let local = pending.node_id_1 == self.local_id || pending.node_id_2 == self.local_id;
		self.process_pending_node_announcements(&pending);
		local
	}

	/// Applies any node_announcement deferred behind the given pending channel and drops the
	/// endpoints' pending slots.
	fn process_pending_node_announcements(&self, pending: &PendingChannelAnnouncement) {
		for node_id in [&pending.node_id_1, &pending.node_id_2].iter() {
			let stashed = self.pending_nodes.lock().unwrap().remove(*node_id);
			if let Some(slot) = stashed {
				if let Some(announcement) = slot.announcement {
					log_gossip!(self.logger, "Processing deferred node_announcement for node {}", node_id);
					let _ = self.handle_node_announcement(&announcement);
				}
			}
		}
	}

	/// Registers one of our own, unannounced channels so the pathfinder can route through it.
	///
	/// The channel is not public: it is never pruned and never given to the broadcast
	/// collaborator. Should its announcement later confirm on-chain, the existing entry is
	/// adopted and becomes public.
	pub fn add_local_channel(&self, short_channel_id: u64, node_id_1: PublicKey, node_id_2: PublicKey) -> Result<(), LightningError> {
		if node_id_1 == node_id_2 {
			return Err(LightningError {
				err: "Channel cannot have the same node at both ends".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}
		let mut channels = self.channels.write().unwrap();
		let mut nodes = self.nodes.write().unwrap();

		match channels.entry(short_channel_id) {
			BtreeEntry::Occupied(_) => {
				return Err(LightningError {
					err: "Already have knowledge of channel".to_owned(),
					action: ErrorAction::IgnoreDuplicateGossip,
				});
			},
			BtreeEntry::Vacant(entry) => {
				let id_1 = NodeId::from_pubkey(&node_id_1);
				let id_2 = NodeId::from_pubkey(&node_id_2);
				let (node_one, node_two) = if id_1 < id_2 { (id_1, id_2) } else { (id_2, id_1) };
				let seed_timestamp = unix_time().saturating_sub(self.prune_timeout / 2);
				for node_id in [&node_one, &node_two].iter() {
					nodes.entry(**node_id).or_insert_with(|| NodeInfo {
						channels: Vec::new(),
						announcement_info: None,
					}).channels.push(short_channel_id);
				}
				entry.insert(ChannelInfo::new(node_one, node_two, seed_timestamp));
			},
		}
		Ok(())
	}

	/// For an already known (from announcement) channel, update info about one of the directions
	/// of the channel.
	///
	/// If the channel is still waiting for its funding check, the update is deferred (newest
	/// timestamp wins) and replayed when the channel is adopted.
	pub fn handle_channel_update(&self, msg: &ChannelUpdate) -> Result<(), LightningError> {
		let short_channel_id = msg.contents.short_channel_id;
		let direction = (msg.contents.flags & 1) as usize;
		let chan_enabled = msg.contents.flags & (1 << 1) != (1 << 1);

		if msg.contents.chain_hash != self.genesis_hash {
			return Err(LightningError {
				err: "Channel update for unknown chain".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		let mut channels = self.channels.write().unwrap();
		let publicly_known = match channels.get(&short_channel_id) {
			Some(chan) => chan.is_public,
			None => false,
		};
		if !publicly_known {
			core::mem::drop(channels);
			let mut pending_channels = self.pending_channels.lock().unwrap();
			if let Some(pending) = pending_channels.get_mut(&short_channel_id) {
				if pending.update_timestamps[direction] < msg.contents.timestamp {
					log_gossip!(self.logger, "Deferring update for pending channel {} direction {}", short_channel_id, direction);
					pending.update_timestamps[direction] = msg.contents.timestamp;
					pending.updates[direction] = Some(msg.clone());
				}
				return Ok(());
			}
			return Err(LightningError {
				err: "Couldn't find channel for update".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		let chan = channels.get_mut(&short_channel_id).expect("is_public checked above");
		{
			let half = chan.directional_info(direction as u8);
			// The timestamp field is somewhat of a misnomer - the BOLTs use it to order updates
			// to ensure you always have the latest one, only vaguely suggesting that it be at
			// least the current time.
			if half.last_update > msg.contents.timestamp as u64 {
				return Err(LightningError {
					err: "Update older than last processed update".to_owned(),
					action: ErrorAction::IgnoreDuplicateGossip,
				});
			} else if half.last_update == msg.contents.timestamp as u64 {
				return Err(LightningError {
					err: "Update had same timestamp as last processed update".to_owned(),
					action: ErrorAction::IgnoreDuplicateGossip,
				});
			}
		}

		let node_id = if direction == 0 { chan.node_one } else { chan.node_two };
		let msg_hash = hash_to_message(&msg.contents.encode()[..]);
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.signature, &get_pubkey_from_node_id!(node_id, "channel_update"), "channel_update");

		log_gossip!(self.logger, "Received channel_update for channel {} direction {} now {}",
			short_channel_id, direction, if chan_enabled { "ACTIVE" } else { "DISABLED" });

		let half = if direction == 0 { &mut chan.one_to_two } else { &mut chan.two_to_one };
		half.cltv_expiry_delta = msg.contents.cltv_expiry_delta as u32;
		half.htlc_minimum_msat = msg.contents.htlc_minimum_msat;
		half.fees = RoutingFees {
			base_msat: msg.contents.fee_base_msat,
			proportional_millionths: msg.contents.fee_proportional_millionths,
		};
		half.enabled = chan_enabled;
		half.last_update = msg.contents.timestamp as u64;
		// If it was temporarily unroutable, re-enable
		half.unroutable_until = 0;
		if half.fees.proportional_millionths >= MAX_PROPORTIONAL_FEE {
			log_trace!(self.logger, "Channel {} direction {} massive proportional fee {}: disabling",
				short_channel_id, direction, half.fees.proportional_millionths);
			half.enabled = false;
		}
		half.last_update_message = Some(msg.clone());

		let mut index = half.update_broadcast_index;
		self.broadcast.replace_broadcast(&mut index, CHANNEL_UPDATE_TYPE,
			BroadcastTag::ChannelUpdate(short_channel_id, direction as u16), msg.encode());
		half.update_broadcast_index = index;

		Ok(())
	}

	/// For an already known node (from channel announcements), update its stored properties from
	/// a given node announcement.
	///
	/// An announcement for a node we only know through a still-pending channel announcement is
	/// stashed (newest timestamp wins) and replayed when that channel resolves.
	pub fn handle_node_announcement(&self, msg: &NodeAnnouncement) -> Result<(), LightningError> {
		let node_id = msg.contents.node_id;

		if msg.contents.features.requires_unknown_bits() {
			return Err(LightningError {
				err: "Node announcement required unknown feature bits".to_owned(),
				action: ErrorAction::IgnoreError,
			});
		}

		let msg_hash = hash_to_message(&msg.contents.encode()[..]);
		secp_verify_sig!(self.secp_ctx, &msg_hash, &msg.signature, &get_pubkey_from_node_id!(node_id, "node_announcement"), "node_announcement");

		let mut nodes = self.nodes.write().unwrap();
		match nodes.get_mut(&node_id) {
			None => {
				core::mem::drop(nodes);
				// Check if we are currently verifying the txout for a matching channel.
				let mut pending_nodes = self.pending_nodes.lock().unwrap();
				if let Some(slot) = pending_nodes.get_mut(&node_id) {
					if slot.timestamp < msg.contents.timestamp {
						log_gossip!(self.logger, "Deferring node_announcement for node {}", node_id);
						slot.timestamp = msg.contents.timestamp;
						slot.announcement = Some(msg.clone());
					}
					return Ok(());
				}
				Err(LightningError {
					err: "No existing channels for node_announcement".to_owned(),
					action: ErrorAction::IgnoreError,
				})
			},
			Some(node) => {
				if let Some(node_info) = node.announcement_info.as_ref() {
					// The timestamp field is somewhat of a misnomer - the BOLTs use it to order
					// updates to ensure you always have the latest one, only vaguely suggesting
					// that it be at least the current time.
					if node_info.last_update > msg.contents.timestamp {
						return Err(LightningError {
							err: "Update older than last processed update".to_owned(),
							action: ErrorAction::IgnoreDuplicateGossip,
						});
					} else if node_info.last_update == msg.contents.timestamp {
						return Err(LightningError {
							err: "Update had the same timestamp as last processed update".to_owned(),
							action: ErrorAction::IgnoreDuplicateGossip,
						});
					}
				}

				log_gossip!(self.logger, "Received node_announcement for node {}", node_id);

				let mut index = node.announcement_info.as_ref().map(|info| info.broadcast_index).unwrap_or(0);
				self.broadcast.replace_broadcast(&mut index, NODE_ANNOUNCEMENT_TYPE,
					BroadcastTag::NodeAnnouncement(node_id), msg.encode());
				node.announcement_info = Some(NodeAnnouncementInfo {
					last_update: msg.contents.timestamp,
					rgb: msg.contents.rgb,
					alias: NodeAlias(msg.contents.alias),
					addresses: msg.contents.addresses.clone(),
					announcement_message: Some(msg.clone()),
					broadcast_index: index,
				});

				Ok(())
			},
		}
	}

	/// Applies an onion routing failure to the graph.
	///
	/// Non-permanent failures make the half-channel leaving the erring node unroutable for
	/// [`UNROUTABLE_PENALTY_SECS`]; permanent ones destroy the channel (or, with the NODE bit,
	/// every channel of the erring node). If the UPDATE bit is set and `channel_update` holds a
	/// raw channel_update message, it is ingested after the penalty so that a fresher legitimate
	/// update may re-enable the channel.
	pub fn routing_failure(&self, erring_node: &PublicKey, short_channel_id: u64, failcode: u16, channel_update: Option<&[u8]>) {
		self.routing_failure_with_time(erring_node, short_channel_id, failcode, channel_update, unix_time())
	}

	/// As [`NetworkGraph::routing_failure`], with the current unix time supplied by the caller.
	pub fn routing_failure_with_time(&self, erring_node: &PublicKey, short_channel_id: u64, failcode: u16, channel_update: Option<&[u8]>, current_time: u64) {
		log_trace!(self.logger, "Received routing failure {:#06x}, erring node {}, channel {}",
			failcode, log_pubkey!(erring_node), short_channel_id);

		let erring = NodeId::from_pubkey(erring_node);
		// Channels marked for destruction are removed only after we've let go of the iteration
		// over the erring node's channel list.
		let mut doomed = Vec::new();
		{
			let mut channels = self.channels.write().unwrap();
			let nodes = self.nodes.read().unwrap();
			let node = match nodes.get(&erring) {
				Some(node) => node,
				None => {
					// No node, so no channel, so any channel_update can also be ignored.
					log_warn!(self.logger, "routing_failure: Erring node {} not in map", erring);
					return;
				},
			};

			if failcode & FAILCODE_NODE != 0 {
				for scid in node.channels.iter() {
					let chan = channels.get_mut(scid).expect("Node listed a channel we don't have");
					Self::penalize_channel_out(chan, &erring, failcode, current_time, *scid, &mut doomed);
				}
			} else {
				match channels.get_mut(&short_channel_id) {
					None => {
						log_warn!(self.logger, "routing_failure: Channel {} unknown", short_channel_id);
					},
					Some(chan) => {
						if chan.node_one != erring && chan.node_two != erring {
							log_warn!(self.logger, "routing_failure: Channel {} does not connect to {}",
								short_channel_id, erring);
						} else {
							Self::penalize_channel_out(chan, &erring, failcode, current_time, short_channel_id, &mut doomed);
						}
					},
				}
			}
		}

		// Update the channel if UPDATE failcode. Do this after deactivating, so that if the
		// channel_update is newer it will be reactivated.
		if failcode & FAILCODE_UPDATE != 0 {
			match channel_update {
				None | Some(&[]) => {
					// Suppress the complaint if the failure was our own.
					if erring != self.local_id {
						log_warn!(self.logger, "routing_failure: UPDATE bit set, no channel_update. failcode: {:#06x}", failcode);
					}
				},
				Some(bytes) => {
					if msgs::peek_message_type(bytes) != Some(msgs::CHANNEL_UPDATE_TYPE) {
						log_warn!(self.logger, "routing_failure: enclosed message is not a channel_update");
					} else {
						match <ChannelUpdate as Readable>::read(&mut &bytes[2..]) {
							Ok(update) => { let _ = self.handle_channel_update(&update); },
							Err(_) => { log_warn!(self.logger, "routing_failure: undecodable channel_update enclosed"); },
						}
					}
				},
			}
		} else if channel_update.map_or(false, |bytes| !bytes.is_empty()) {
			log_warn!(self.logger, "routing_failure: UPDATE bit clear, channel_update given. failcode: {:#06x}", failcode);
		}

		if !doomed.is_empty() {
			let mut channels = self.channels.write().unwrap();
			let mut nodes = self.nodes.write().unwrap();
			for scid in doomed {
				if let Some(chan) = channels.remove(&scid) {
					log_trace!(self.logger, "Removing channel {} from network view due to permanent failure", scid);
					Self::remove_channel_in_nodes(&mut nodes, &chan, scid);
				}
			}
		}
	}

	fn penalize_channel_out(chan: &mut ChannelInfo, erring: &NodeId, failcode: u16, current_time: u64, short_channel_id: u64, doomed: &mut Vec<u64>) {
		if failcode & FAILCODE_PERM == 0 {
			let half = if chan.node_one == *erring { &mut chan.one_to_two } else { &mut chan.two_to_one };
			half.unroutable_until = current_time + UNROUTABLE_PENALTY_SECS;
		} else {
			doomed.push(short_channel_id);
		}
	}

	/// Makes both directions of the given channel unroutable for [`UNROUTABLE_PENALTY_SECS`],
	/// until a fresh channel_update re-enables them.
	pub fn mark_channel_unroutable(&self, short_channel_id: u64) {
		self.mark_channel_unroutable_with_time(short_channel_id, unix_time())
	}

	/// As [`NetworkGraph::mark_channel_unroutable`], with the current unix time supplied by the
	/// caller.
	pub fn mark_channel_unroutable_with_time(&self, short_channel_id: u64, current_time: u64) {
		let mut channels = self.channels.write().unwrap();
		match channels.get_mut(&short_channel_id) {
			None => {
				log_warn!(self.logger, "mark_channel_unroutable: channel {} not in routemap", short_channel_id);
			},
			Some(chan) => {
				chan.one_to_two.unroutable_until = current_time + UNROUTABLE_PENALTY_SECS;
				chan.two_to_one.unroutable_until = current_time + UNROUTABLE_PENALTY_SECS;
			},
		}
	}

	/// Removes information about public channels whose both directions have gone without an
	/// update for at least the prune timeout. Channels registered via
	/// [`NetworkGraph::add_local_channel`] and not yet announced are kept regardless.
	///
	/// This can be used regularly to prune the network graph of channels that likely no longer
	/// exist.
	pub fn prune_stale_channels(&self) {
		self.prune_stale_channels_with_time(unix_time())
	}

	/// As [`NetworkGraph::prune_stale_channels`], with the current unix time supplied by the
	/// caller.
	pub fn prune_stale_channels_with_time(&self, current_time: u64) {
		// Anything below this highwater mark ought to be pruned.
		let highwater = current_time.saturating_sub(self.prune_timeout);
		let mut channels = self.channels.write().unwrap();
		let mut scids_to_remove = Vec::new();
		for (scid, chan) in channels.iter() {
			// Local-only? Don't prune.
			if !chan.is_public {
				continue;
			}
			if chan.one_to_two.last_update < highwater && chan.two_to_one.last_update < highwater {
				log_trace!(self.logger, "Pruning channel {} from network view (ages {}s and {}s)",
					scid, current_time.saturating_sub(chan.one_to_two.last_update),
					current_time.saturating_sub(chan.two_to_one.last_update));
				scids_to_remove.push(*scid);
			}
		}
		// Removal happens outside the scan so iteration never sees a half-removed channel.
		if !scids_to_remove.is_empty() {
			let mut nodes = self.nodes.write().unwrap();
			for scid in scids_to_remove {
				let chan = channels.remove(&scid).expect("We just accessed this scid, it should be present");
				Self::remove_channel_in_nodes(&mut nodes, &chan, scid);
			}
		}
	}

	fn remove_channel_in_nodes(nodes: &mut BTreeMap<NodeId, NodeInfo>, chan: &ChannelInfo, short_channel_id: u64) {
		macro_rules! remove_from_node {
			($node_id: expr) => {
				if let BtreeEntry::Occupied(mut entry) = nodes.entry($node_id) {
					entry.get_mut().channels.retain(|chan_id| {
						short_channel_id != *chan_id
					});
					if entry.get().channels.is_empty() {
						entry.remove_entry();
					}
				} else {
					panic!("Had channel that pointed to unknown node (ie inconsistent network map)!");
				}
			}
		}

		remove_from_node!(chan.node_one);
		remove_from_node!(chan.node_two);
	}
}
