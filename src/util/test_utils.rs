// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::routing::gossip::{BroadcastStore, BroadcastTag};
use crate::util::logger::{Level, Logger, Record};

use std::collections::HashMap;
use std::sync::Mutex;

pub struct TestLogger {
	level: Level,
	id: String,
	pub lines: Mutex<HashMap<(String, String), usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}
	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			level: Level::Trace,
			id,
			lines: Mutex::new(HashMap::new()),
		}
	}
	pub fn enable(&mut self, level: Level) {
		self.level = level;
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: String, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter().filter(|&(&(ref m, ref l), _c)| {
			m == &module && l.contains(line.as_str())
		}).map(|(_, c)| { c }).sum();
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: &Record) {
		*self.lines.lock().unwrap().entry((record.module_path.to_string(), format!("{}", record.args))).or_insert(0) += 1;
		if self.level >= record.level {
			println!("{:<5} {} [{} : {}, {}] {}", record.level.to_string(), self.id, record.module_path, record.file, record.line, record.args);
		}
	}
}

/// A broadcast collaborator which records everything handed to it, keyed by the slot indices it
/// assigns.
pub struct TestBroadcastStore {
	pub broadcasts: Mutex<HashMap<u64, (u16, BroadcastTag, Vec<u8>)>>,
	next_index: Mutex<u64>,
}

impl TestBroadcastStore {
	pub fn new() -> TestBroadcastStore {
		TestBroadcastStore {
			broadcasts: Mutex::new(HashMap::new()),
			// Slot 0 means "never broadcast", so indices start at 1.
			next_index: Mutex::new(1),
		}
	}

	/// The number of currently-stored messages of the given wire type.
	pub fn count_of_type(&self, message_type: u16) -> usize {
		self.broadcasts.lock().unwrap().values().filter(|(t, _, _)| *t == message_type).count()
	}

	/// The latest payload stored under the given tag, if any.
	pub fn payload_for_tag(&self, tag: &BroadcastTag) -> Option<Vec<u8>> {
		self.broadcasts.lock().unwrap().values()
			.find(|(_, t, _)| t == tag)
			.map(|(_, _, payload)| payload.clone())
	}
}

impl BroadcastStore for TestBroadcastStore {
	fn replace_broadcast(&self, index: &mut u64, message_type: u16, tag: BroadcastTag, payload: Vec<u8>) -> bool {
		let mut broadcasts = self.broadcasts.lock().unwrap();
		let replaced = if *index != 0 {
			broadcasts.remove(index).is_some()
		} else {
			false
		};
		let mut next_index = self.next_index.lock().unwrap();
		*index = *next_index;
		*next_index += 1;
		broadcasts.insert(*index, (message_type, tag, payload));
		replaced
	}
}
