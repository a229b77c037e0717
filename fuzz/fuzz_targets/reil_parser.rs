#![no_main]

use libfuzzer_sys::fuzz_target;
use reilflow_core::{parse_edge, parse_instruction, parse_listing};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Single lines should never panic
    for line in text.lines() {
        if let Ok(instruction) = parse_instruction(line) {
            let _ = instruction.native_address();
            let _ = instruction.used_registers();
            let _ = instruction.defined_register();

            // Display output parses back to the same instruction
            let printed = instruction.to_string();
            if let Ok(reparsed) = parse_instruction(&printed) {
                assert_eq!(reparsed.address, instruction.address);
                assert_eq!(reparsed.opcode, instruction.opcode);
            }
        }
        let _ = parse_edge(line);
    }

    // Whole listings should never panic
    if let Ok(graph) = parse_listing(text) {
        for block in graph.blocks() {
            let _ = graph.successors(block.id);
            let _ = graph.predecessors(block.id);
        }
    }
});
