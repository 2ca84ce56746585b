#![no_std]

// Types shared between the userspace control plane and the TC ingress
// program. Everything here must stay `no_std` so the kernel side can use it.

#[cfg(test)]
extern crate std;

pub mod layout;
pub mod order;

pub use layout::{
    LayoutError, LbKey, LbUpstream, Strategy, TcAction, KEY_LEN, LAYOUT_VERSION, VALUE_LEN,
};
