// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel address allocation.
//!
//! Candidates are scanned in ascending order starting at the first host
//! address after the network address. The scan stops strictly before the last
//! address of the range, which is never handed out.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
	#[error("no free address left in {range}")]
	ResourceExhausted { range: Ipv4Net },
}

/// Returns the lowest free host address of `range`.
///
/// `range` may carry host bits (`10.0.0.1/24`); only its network part is used.
/// `/31` and `/32` ranges have no allocatable addresses.
pub fn allocate(range: Ipv4Net, used: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr, AllocationError> {
	let range = range.trunc();
	let last = u32::from(range.broadcast());
	let exhausted = AllocationError::ResourceExhausted { range };

	let Some(first) = u32::from(range.network()).checked_add(1) else {
		return Err(exhausted);
	};

	(first..last)
		.map(Ipv4Addr::from)
		.find(|candidate| !used.contains(candidate))
		.ok_or(exhausted)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn net(s: &str) -> Ipv4Net {
		s.parse().unwrap()
	}

	fn addrs(list: &[&str]) -> HashSet<Ipv4Addr> {
		list.iter().map(|s| s.parse().unwrap()).collect()
	}

	#[test]
	fn skips_used_addresses() {
		let got = allocate(net("10.0.0.0/29"), &addrs(&["10.0.0.1", "10.0.0.2"])).unwrap();
		assert_eq!(got, Ipv4Addr::new(10, 0, 0, 3));
	}

	#[test]
	fn empty_used_set_gives_first_host() {
		let got = allocate(net("192.168.7.0/24"), &HashSet::new()).unwrap();
		assert_eq!(got, Ipv4Addr::new(192, 168, 7, 1));
	}

	#[test]
	fn host_bits_in_range_are_ignored() {
		let got = allocate(net("10.8.0.1/24"), &addrs(&["10.8.0.1"])).unwrap();
		assert_eq!(got, Ipv4Addr::new(10, 8, 0, 2));
	}

	#[test]
	fn never_returns_last_address() {
		let used = addrs(&[
			"10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6",
		]);
		let err = allocate(net("10.0.0.0/29"), &used).unwrap_err();
		assert_eq!(
			err,
			AllocationError::ResourceExhausted {
				range: net("10.0.0.0/29")
			}
		);
	}

	#[test]
	fn gaps_are_filled_first() {
		let used = addrs(&["10.0.0.1", "10.0.0.3"]);
		assert_eq!(
			allocate(net("10.0.0.0/29"), &used).unwrap(),
			Ipv4Addr::new(10, 0, 0, 2)
		);
	}

	#[test]
	fn tiny_ranges_are_exhausted() {
		assert!(allocate(net("10.0.0.0/31"), &HashSet::new()).is_err());
		assert!(allocate(net("10.0.0.0/32"), &HashSet::new()).is_err());
		assert!(allocate(net("255.255.255.255/32"), &HashSet::new()).is_err());
	}

	#[test]
	fn addresses_outside_range_do_not_matter() {
		let used = addrs(&["10.0.1.1", "192.168.0.1"]);
		assert_eq!(
			allocate(net("10.0.0.0/30"), &used).unwrap(),
			Ipv4Addr::new(10, 0, 0, 1)
		);
	}

	fn range_and_used() -> impl Strategy<Value = (Ipv4Net, HashSet<Ipv4Addr>)> {
		(any::<u32>(), 20u8..=30).prop_flat_map(|(base, prefix)| {
			let range = Ipv4Net::new(Ipv4Addr::from(base), prefix).unwrap().trunc();
			let start = u32::from(range.network());
			let size = 1u32 << (32 - prefix);
			let used = proptest::collection::hash_set(0..size, 0..(size as usize).min(64))
				.prop_map(move |offsets| {
					offsets
						.into_iter()
						.map(|o| Ipv4Addr::from(start.wrapping_add(o)))
						.collect::<HashSet<_>>()
				});
			(Just(range), used)
		})
	}

	proptest! {
		#[test]
		fn allocation_is_a_free_host_of_the_range((range, used) in range_and_used()) {
			match allocate(range, &used) {
				Ok(addr) => {
					prop_assert!(range.contains(&addr));
					prop_assert!(addr > range.network());
					prop_assert!(addr < range.broadcast());
					prop_assert!(!used.contains(&addr));
					for below in u32::from(range.network()) + 1..u32::from(addr) {
						prop_assert!(used.contains(&Ipv4Addr::from(below)));
					}
				}
				Err(AllocationError::ResourceExhausted { range: reported }) => {
					prop_assert_eq!(reported, range);
					for host in u32::from(range.network()) + 1..u32::from(range.broadcast()) {
						prop_assert!(used.contains(&Ipv4Addr::from(host)));
					}
				}
			}
		}

		#[test]
		fn full_span_is_exhausted(base in any::<u32>(), prefix in 26u8..=30) {
			let range = Ipv4Net::new(Ipv4Addr::from(base), prefix).unwrap().trunc();
			let used: HashSet<Ipv4Addr> = (u32::from(range.network()) + 1..u32::from(range.broadcast()))
				.map(Ipv4Addr::from)
				.collect();
			prop_assert!(allocate(range, &used).is_err());
		}

		#[test]
		fn allocation_is_deterministic((range, used) in range_and_used()) {
			prop_assert_eq!(allocate(range, &used), allocate(range, &used));
		}
	}
}
