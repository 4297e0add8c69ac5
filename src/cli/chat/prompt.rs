use rustyline::{Config, Editor, Result};

pub fn generate_prompt(attachment: Option<&str>) -> String {
    match attachment {
        Some(name) => format!("[+{}] > ", name),
        None => "> ".to_string(),
    }
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(false)
        .build();
    Editor::with_config(config)
}
