//! UI utilities for the CLI

use colored::*;
use crossterm::{
    event::{self, Event, KeyCode},
    terminal::{disable_raw_mode, enable_raw_mode, size},
};
use std::io::{self, IsTerminal, Write};

use docrag_core::{Chunk, IndexingResult, QueryResult, Result};

const PROMPT: &str = "docrag>";

/// Display startup banner
pub fn display_banner() {
    let terminal_width = size().map(|(w, _)| w as usize).unwrap_or(80);
    let banner_width = std::cmp::min(67, terminal_width.saturating_sub(4)).max(40);

    let top_border = format!("┌{}┐", "─".repeat(banner_width - 2));
    let bottom_border = format!("└{}┘", "─".repeat(banner_width - 2));
    let empty_line = format!("│{}│", " ".repeat(banner_width - 2));

    println!();
    println!("{}", top_border.blue());
    println!("{}", empty_line.blue());

    let title = "DocRAG - Questions sur vos documents";
    println!(
        "│  {}{}│",
        title.blue().bold(),
        " ".repeat(banner_width.saturating_sub(title.chars().count() + 4))
    );
    println!("{}", empty_line.blue());

    let feature_lines = [
        "Réponses sourcées à partir des documents indexés",
        "",
        "• Recherche vectorielle et hybride",
        "• Décomposition des questions complexes",
        "• Historique des questions (↑/↓)",
        "",
        "v0.1.0",
    ];

    for line in feature_lines {
        if line.is_empty() {
            println!("{}", empty_line.blue());
            continue;
        }
        let padding = " ".repeat(banner_width.saturating_sub(line.chars().count() + 4));
        let content = if line.starts_with("v0.1.0") {
            format!("│  {}{}│", line.dimmed(), padding)
        } else {
            format!("│  {}{}│", line, padding)
        };
        println!("{}", content.blue());
    }

    println!("{}", empty_line.blue());
    println!("{}", bottom_border.blue());
    println!();
    println!("{}", "💡 Posez votre question, ou tapez 'help'".dimmed());
    println!();
}

/// Handle input with history navigation
pub async fn handle_input_with_history(history: &mut Vec<String>) -> Result<String> {
    if !io::stdin().is_terminal() {
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_string();
        if !input.is_empty() {
            history.push(input.clone());
        }
        return Ok(input);
    }

    enable_raw_mode()?;
    let result = read_line_raw(history);
    disable_raw_mode()?;
    println!();
    result
}

fn redraw(input: &str) -> Result<()> {
    print!("\r{} {}\r{} {}", PROMPT.green().bold(), " ".repeat(60), PROMPT.green().bold(), input);
    io::stdout().flush()?;
    Ok(())
}

fn read_line_raw(history: &mut Vec<String>) -> Result<String> {
    let mut input = String::new();
    let mut history_index: Option<usize> = None;

    print!("{} ", PROMPT.green().bold());
    io::stdout().flush()?;

    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        match key_event.code {
            KeyCode::Enter => {
                if !input.trim().is_empty() {
                    history.push(input.clone());
                }
                return Ok(input);
            }
            KeyCode::Char(c) => {
                input.push(c);
                redraw(&input)?;
            }
            KeyCode::Backspace => {
                if input.pop().is_some() {
                    redraw(&input)?;
                }
            }
            KeyCode::Up => {
                if !history.is_empty() {
                    let new_index = match history_index {
                        None => history.len() - 1,
                        Some(idx) => idx.saturating_sub(1),
                    };
                    history_index = Some(new_index);
                    input = history[new_index].clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if let Some(idx) = history_index {
                    if idx + 1 < history.len() {
                        history_index = Some(idx + 1);
                        input = history[idx + 1].clone();
                    } else {
                        history_index = None;
                        input.clear();
                    }
                    redraw(&input)?;
                }
            }
            KeyCode::Esc => return Ok(String::new()),
            _ => {}
        }
    }
}

/// Display help message
pub fn print_help() {
    println!("{}", "Commandes disponibles:".bold());
    println!("  {} - Poser une question sur les documents indexés", "<question>".green());
    println!("  {} - Niveau de détail des réponses", "expertise novice|intermediate|expert".green());
    println!("  {} - Évaluer la dernière réponse", "feedback +|-".green());
    println!("  {} - Statistiques de l'index et de l'usage", "stats".green());
    println!("  {} - Oublier l'historique de conversation", "clear".green());
    println!("  {} - Afficher cette aide", "help".green());
    println!("  {} - Quitter", "exit/quit".green());
    println!();
    println!("{}", "Exemples:".bold());
    println!("  Quel est le délai d'exécution du marché ?");
    println!("  Comment soumettre une offre ?");
    println!("  Comparer les pénalités du CCAP et du CCTP");
}

/// Answer, sources and confidence as terminal text
pub fn format_result(result: &QueryResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", result.answer));

    if !result.sources.is_empty() {
        out.push_str(&format!("\n{}\n", "Sources:".bold()));
        for (i, source) in result.sources.iter().enumerate() {
            let location = match (&source.metadata.section_type, source.metadata.page_number) {
                (Some(section), Some(page)) => format!(" ({}, p. {})", section, page),
                (Some(section), None) => format!(" ({})", section),
                (None, Some(page)) => format!(" (p. {})", page),
                (None, None) => String::new(),
            };
            out.push_str(&format!(
                "  [{}] {}{} {}\n",
                i + 1,
                source.document_id.cyan(),
                location,
                format!("{:.2}", source.score).dimmed()
            ));
        }
    }

    let mut details = vec![format!("confiance {:.0}%", result.confidence * 100.0)];
    if let Some(router) = &result.metadata.router {
        details.push(format!("{} → {}", router.query_type, router.engine_used.as_str()));
    }
    if result.metadata.cached {
        details.push("cache".to_string());
    }
    if result.metadata.requires_validation {
        details.push("à valider".to_string());
    }
    out.push_str(&format!("\n{}", details.join(" · ").dimmed()));
    out
}

/// One line per indexed document
pub fn format_indexing(results: &[IndexingResult]) -> String {
    results
        .iter()
        .map(|r| {
            if r.skipped {
                format!("{} {} déjà indexé ({} chunks)", "•".yellow(), r.document_id, r.num_chunks)
            } else if r.success {
                format!(
                    "{} {} indexé: {} chunks, {} embeddings en {} ms",
                    "✅".green(),
                    r.document_id,
                    r.num_chunks,
                    r.num_embeddings,
                    r.processing_time_ms
                )
            } else {
                format!("{} {} échec: {}", "❌".red(), r.document_id, r.errors.join("; "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunk plan: index, section, size and the start of each chunk
pub fn format_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            let preview: String = c.text.chars().take(60).collect::<String>().replace('\n', " ");
            format!(
                "#{:<3} {:<20} {:>5} car.  {}",
                c.index,
                c.section_type.as_deref().unwrap_or("-"),
                c.size,
                preview.dimmed()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
