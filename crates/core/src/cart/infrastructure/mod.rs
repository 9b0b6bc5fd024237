pub mod in_memory_catalog;
pub mod json_lines_mutation_sink;
pub mod logging_mutation_sink;
