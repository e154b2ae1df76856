/// Native module contains a sandbox that runs submissions as plain child
/// processes with the host toolchains, without Docker or other isolation
/// layers. Each execution gets a throwaway working directory.
pub mod sandbox;
pub mod toolchain;
