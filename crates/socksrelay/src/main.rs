//! The socksrelay binary: a thin wrapper around [`socksrelay::main`].

fn main() {
    socksrelay::main();
}
