// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::ln::chan_utils::make_funding_redeemscript;
use crate::ln::features::Features;
use crate::ln::msgs::{ChannelAnnouncement, ChannelUpdate, NodeAnnouncement};
use crate::ln::msgs::{UnsignedChannelAnnouncement, UnsignedChannelUpdate, UnsignedNodeAnnouncement};
use crate::routing::gossip::NodeId;
use crate::util::ser::Writeable;

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::blockdata::script::Script;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::hashes::Hash;
use bitcoin::network::constants::Network;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

pub(crate) fn get_signed_node_announcement<F: Fn(&mut UnsignedNodeAnnouncement)>(
	f: F, node_key: &SecretKey, secp_ctx: &Secp256k1<All>,
) -> NodeAnnouncement {
	let node_id = NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, node_key));
	let mut unsigned_announcement = UnsignedNodeAnnouncement {
		features: Features::empty(),
		timestamp: 100,
		node_id,
		rgb: [0; 3],
		alias: [0; 32],
		addresses: Vec::new(),
		excess_address_data: Vec::new(),
		excess_data: Vec::new(),
	};
	f(&mut unsigned_announcement);
	let msghash = Message::from_slice(&Sha256dHash::hash(&unsigned_announcement.encode()[..])[..]).unwrap();
	NodeAnnouncement {
		signature: secp_ctx.sign_ecdsa(&msghash, node_key),
		contents: unsigned_announcement,
	}
}

pub(crate) fn get_signed_channel_announcement<F: Fn(&mut UnsignedChannelAnnouncement)>(
	f: F, node_1_key: &SecretKey, node_2_key: &SecretKey, secp_ctx: &Secp256k1<All>,
) -> ChannelAnnouncement {
	let node_id_1 = PublicKey::from_secret_key(&secp_ctx, node_1_key);
	let node_id_2 = PublicKey::from_secret_key(&secp_ctx, node_2_key);
	let node_1_btckey = &SecretKey::from_slice(&[40; 32]).unwrap();
	let node_2_btckey = &SecretKey::from_slice(&[39; 32]).unwrap();

	let mut unsigned_announcement = UnsignedChannelAnnouncement {
		features: Features::empty(),
		chain_hash: genesis_block(Network::Testnet).header.block_hash(),
		short_channel_id: 0,
		node_id_1: NodeId::from_pubkey(&node_id_1),
		node_id_2: NodeId::from_pubkey(&node_id_2),
		bitcoin_key_1: NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, node_1_btckey)),
		bitcoin_key_2: NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, node_2_btckey)),
		excess_data: Vec::new(),
	};
	f(&mut unsigned_announcement);
	let msghash = Message::from_slice(&Sha256dHash::hash(&unsigned_announcement.encode()[..])[..]).unwrap();
	ChannelAnnouncement {
		node_signature_1: secp_ctx.sign_ecdsa(&msghash, node_1_key),
		node_signature_2: secp_ctx.sign_ecdsa(&msghash, node_2_key),
		bitcoin_signature_1: secp_ctx.sign_ecdsa(&msghash, node_1_btckey),
		bitcoin_signature_2: secp_ctx.sign_ecdsa(&msghash, node_2_btckey),
		contents: unsigned_announcement,
	}
}

/// The funding output script matching [`get_signed_channel_announcement`]'s bitcoin keys.
pub(crate) fn get_channel_script(secp_ctx: &Secp256k1<All>) -> Script {
	let node_1_btckey = SecretKey::from_slice(&[40; 32]).unwrap();
	let node_2_btckey = SecretKey::from_slice(&[39; 32]).unwrap();
	make_funding_redeemscript(&PublicKey::from_secret_key(secp_ctx, &node_1_btckey),
		&PublicKey::from_secret_key(secp_ctx, &node_2_btckey)).to_v0_p2wsh()
}

pub(crate) fn get_signed_channel_update<F: Fn(&mut UnsignedChannelUpdate)>(
	f: F, node_key: &SecretKey, secp_ctx: &Secp256k1<All>,
) -> ChannelUpdate {
	let mut unsigned_channel_update = UnsignedChannelUpdate {
		chain_hash: genesis_block(Network::Testnet).header.block_hash(),
		short_channel_id: 0,
		timestamp: 100,
		flags: 0,
		cltv_expiry_delta: 144,
		htlc_minimum_msat: 1_000_000,
		fee_base_msat: 10_000,
		fee_proportional_millionths: 20,
		excess_data: Vec::new(),
	};
	f(&mut unsigned_channel_update);
	let msghash = Message::from_slice(&Sha256dHash::hash(&unsigned_channel_update.encode()[..])[..]).unwrap();
	ChannelUpdate {
		signature: secp_ctx.sign_ecdsa(&msghash, node_key),
		contents: unsigned_channel_update,
	}
}

/// Returns the two keys ordered so that the first's serialized public key is the
/// lexicographically smaller, ie the first is the graph's `node_one` on a channel between them.
pub(crate) fn sort_node_keys(secp_ctx: &Secp256k1<All>, key_a: &SecretKey, key_b: &SecretKey) -> (SecretKey, SecretKey) {
	let pubkey_a = PublicKey::from_secret_key(secp_ctx, key_a).serialize();
	let pubkey_b = PublicKey::from_secret_key(secp_ctx, key_b).serialize();
	if pubkey_a[..] < pubkey_b[..] {
		(key_a.clone(), key_b.clone())
	} else {
		(key_b.clone(), key_a.clone())
	}
}

/// Three secret keys whose public keys sort ascending, for building A - B - C line graphs.
pub(crate) fn three_sorted_keys(secp_ctx: &Secp256k1<All>) -> (SecretKey, SecretKey, SecretKey) {
	let mut keys = vec![
		SecretKey::from_slice(&[42; 32]).unwrap(),
		SecretKey::from_slice(&[41; 32]).unwrap(),
		SecretKey::from_slice(&[40; 32]).unwrap(),
	];
	keys.sort_by_key(|key| PublicKey::from_secret_key(secp_ctx, key).serialize());
	(keys[0].clone(), keys[1].clone(), keys[2].clone())
}
