//! # Smelt Core
//!
//! `smelt-core` holds the building blocks shared by the smelt DRAM tools:
//! translating addresses into DRAM coordinates, drawing constrained addresses
//! from a memory region, timing memory accesses and summarizing the timings.
//!
//! ## Main Components
//!
//! - [`memory`] module - [`memory::CoordinateMaps`] translate between addresses
//!   and row/column/bank/set/slice coordinates, [`memory::AddressPool`] draws
//!   constrained addresses without replacement, [`memory::MapConfig`] loads
//!   the bit masks.
//!
//! - [`stats`] module - quantiles, medians and histograms of timing samples.
//!
//! - [`timing`] module - the [`timing::Timing`] abstraction over cycle counter,
//!   cache flushes and event counters, plus timed pair reads.
//!
//! - [`chase`] module - installing and walking access patterns as pointer chases.
//!
//! - [`counter`] module - programming hardware event counters.
//!
//! - [`allocator::RegionAllocator`] and [`hammerer::Hammering`] - traits
//!   implemented by region providers and hammerers.
//!
//! ## Platform Support
//!
//! smelt targets x86_64 Linux. Physically contiguous memory requires huge
//! pages, and counter programming requires root and msr-tools.

#![warn(missing_docs)]

pub mod allocator;
pub mod chase;
pub mod counter;
pub mod hammerer;
pub mod memory;
pub mod stats;
pub mod timing;
pub mod util;
