/*
    Stress test showing the cost of id generation, which happens once per
    span and once per trace.

    Run with `cargo run --release --bin random`.
*/

use ddtrace_sdk::trace::{IdGenerator, RandomIdGenerator};
use lazy_static::lazy_static;

mod throughput;

lazy_static! {
    static ref GENERATOR: RandomIdGenerator = RandomIdGenerator::with_128_bit_trace_ids();
}

fn main() {
    throughput::test_throughput(test_id_generation);
}

fn test_id_generation() {
    let _ids = (GENERATOR.new_trace_id(), GENERATOR.new_span_id());
}
