// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Feature flag definitions for the gossip protocol.
//!
//! The routing core does not itself implement any optional gossip features, so the only question
//! it ever asks of a feature field is whether it *requires* something we don't know about.
//! Features are represented as a raw bitfield in the wire byte order; flags are numbered from the
//! least-significant bit of the last byte. Even bits are required ("it's not OK to be odd"), odd
//! bits are optional.

use std::io::Read;

use crate::ln::msgs::DecodeError;
use crate::util::ser::{Readable, Writeable, Writer};

/// The feature bitfield carried in channel and node announcements.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Features {
	/// Note that, for convenience, flags is LITTLE endian with respect to the byte order on the
	/// wire: flags[0] is the last wire byte, so bit 0 of flags[0] is feature bit 0.
	flags: Vec<u8>,
}

impl Features {
	/// Create a blank Features with no features set
	pub fn empty() -> Features {
		Features { flags: Vec::new() }
	}

	/// Create a Features from the given flag bytes, in feature-bit order (bit 0 of byte 0 is
	/// feature bit 0).
	pub fn from_le_bytes(flags: Vec<u8>) -> Features {
		Features { flags }
	}

	/// Returns true if a feature which we do not understand is required by this field. As the
	/// routing core understands no optional gossip features, this is simply "is any even bit
	/// set".
	pub fn requires_unknown_bits(&self) -> bool {
		self.flags.iter().any(|&byte| (byte & 0x55) != 0)
	}

	/// Returns true if any feature bit at all is set.
	pub fn supports_unknown_bits(&self) -> bool {
		self.flags.iter().any(|&byte| byte != 0)
	}
}

impl Writeable for Features {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), std::io::Error> {
		(self.flags.len() as u16).write(w)?;
		for f in self.flags.iter().rev() { // Swap back to big-endian
			f.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Features {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut flags: Vec<u8> = Vec::new();
		let len: u16 = Readable::read(r)?;
		let mut buf = vec![0; len as usize];
		r.read_exact(&mut buf)?;
		for b in buf.iter().rev() {
			flags.push(*b);
		}
		Ok(Features { flags })
	}
}
