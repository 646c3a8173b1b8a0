//! Network identity of a participant: the address it advertises and the
//! port it will serve on.

mod address;
mod ports;

pub use address::{
    resolve_local_address, AddressResolver, InterfaceAddressResolver, StaticAddressResolver,
};
pub use ports::{allocate_port, is_port_in_use, reserve_port, PortRange, PortReservation};
