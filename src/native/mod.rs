/// Native module contains the operations that saturate a real resource
/// of the host: CPU, memory, disk and network.
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod timeout;
