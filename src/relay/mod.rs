//! Room relay: membership, presence broadcasts and request forwarding
//! between Agents and Computers.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
