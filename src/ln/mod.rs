// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Types shared with the rest of a lightning node: gossip messages, feature flags and the
//! funding-output script construction which on-chain confirmation is checked against.

pub mod chan_utils;
pub mod features;
pub mod msgs;
