//! Terminal interface for DocRAG

mod session;
mod ui;


pub use session::{ChatCommand, ChatSession};
pub use ui::{
    display_banner, format_chunks, format_indexing, format_result, handle_input_with_history,
    print_help,
};

// Re-export core types
pub use docrag_core::{Error, Result};
