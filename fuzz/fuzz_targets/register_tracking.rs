#![no_main]

use libfuzzer_sys::fuzz_target;
use reilflow_analysis::mono::AnalysisDirection;
use reilflow_analysis::register_tracking::{RegisterTracker, RegisterTrackingOptions};
use reilflow_core::parse_listing;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let Ok(text) = std::str::from_utf8(&data[2..]) else {
        return;
    };
    let Ok(graph) = parse_listing(text) else {
        return;
    };

    // Limit graph size to keep iterations fast
    if graph.num_instructions() > 256 {
        return;
    }

    let direction = if data[0] & 1 == 0 {
        AnalysisDirection::Down
    } else {
        AnalysisDirection::Up
    };
    let options = RegisterTrackingOptions::new(direction).with_clear_registers_on_calls(data[0] & 2 != 0);

    // Tracking from every native instruction should never panic or fail
    let natives: Vec<u64> = graph
        .blocks()
        .flat_map(|b| b.instructions.iter().map(|i| i.native_address()))
        .collect();
    let register = ["eax", "ebx", "ecx", "edx"][usize::from(data[1]) % 4];
    for native in natives.into_iter().take(8) {
        RegisterTracker::track_graph(&graph, native, register, &options).expect("tracking succeeds");
    }
});
