//! Prompt templates and fixed answers used by the query engines

use docrag_core::{ConversationTurn, ScoredChunk, SubQuestion};

/// Answer returned when retrieval finds nothing usable
pub const NO_RESULTS_ANSWER: &str =
    "Je n'ai pas trouvé d'informations pertinentes dans les documents pour répondre à cette question.";

/// Prefix shared by every "nothing found" style answer
pub const NO_INFORMATION_PREFIX: &str = "Je n'ai pas trouvé d'informations";

pub fn error_answer(error: &str) -> String {
    format!(
        "Une erreur s'est produite lors du traitement de votre question: {}",
        error
    )
}

/// Placeholder stored on a sub-question whose execution failed or timed out
pub fn subquestion_error_answer(error: &str) -> String {
    format!("Erreur lors de la recherche: {}", error)
}

pub const ANSWER_SYSTEM: &str = "Tu es un assistant expert en marchés publics français.
Tu réponds aux questions en te basant UNIQUEMENT sur le contexte fourni.

Règles importantes:
1. Cite toujours les sources pertinentes [Source N]
2. Si l'information n'est pas dans le contexte, dis-le clairement
3. Sois précis et factuel
4. Utilise un français professionnel
5. Structure ta réponse de manière claire";

/// Numbered context block built from retrieved chunks
pub fn format_context(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut part = format!("[Source {}] (Pertinence: {:.2})\n", i + 1, result.score);
            if let Some(section) = &result.chunk.section_type {
                part.push_str(&format!("Section: {}\n", section));
            }
            part.push_str(&result.chunk.text);
            part
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub fn answer_prompt(question: &str, context: &str, background: Option<&str>) -> String {
    let background = background
        .filter(|b| !b.trim().is_empty())
        .map(|b| format!("{}\n\n", b))
        .unwrap_or_default();

    format!(
        "{}Question: {}\n\nContexte disponible:\n{}\n\nRéponds à la question en te basant uniquement sur le contexte fourni.\nCite les sources entre crochets [Source N] pour chaque information importante.",
        background, question, context
    )
}

pub fn decompose_system(max_subquestions: usize) -> String {
    format!(
        "Tu es un expert en analyse de questions complexes sur les marchés publics.

Décompose la question en sous-questions atomiques qui peuvent être répondues indépendamment.

Règles:
1. Chaque sous-question doit être simple et précise
2. Évite la redondance entre sous-questions
3. Ordonne par priorité (plus important en premier)
4. Maximum {} sous-questions
5. Indique les dépendances par le numéro (à partir de 1) de la sous-question requise

Réponds UNIQUEMENT avec un objet JSON de la forme:
{{\"subquestions\": [{{\"question\": \"La sous-question\", \"context\": \"Contexte ou clarification\", \"priority\": 1, \"dependencies\": []}}]}}",
        max_subquestions
    )
}

pub fn decompose_prompt(query: &str) -> String {
    format!(
        "Question complexe à décomposer:\n{}\n\nDécompose cette question en sous-questions atomiques.",
        query
    )
}

/// Answers of already answered dependencies, given as background to a sub-question
pub fn dependency_context(answered: &[(&str, &str)]) -> Option<String> {
    if answered.is_empty() {
        return None;
    }
    let lines: Vec<String> = answered
        .iter()
        .map(|(question, answer)| format!("{}: {}", question, answer))
        .collect();
    Some(format!(
        "Contexte des questions précédentes:\n{}",
        lines.join("\n")
    ))
}

pub const SYNTHESIS_SYSTEM: &str = "Tu es un expert en synthèse d'informations sur les marchés publics.

Synthétise les réponses aux sous-questions pour répondre à la question principale.

Règles importantes:
1. Base-toi UNIQUEMENT sur les réponses aux sous-questions
2. Sois complet mais concis
3. Structure ta réponse de manière claire
4. Cite les sources pertinentes
5. Indique si certains aspects n'ont pas pu être répondus";

pub fn synthesis_prompt(query: &str, subquestions: &[SubQuestion]) -> String {
    let answers: Vec<String> = subquestions
        .iter()
        .enumerate()
        .filter_map(|(i, sq)| {
            sq.answer
                .as_deref()
                .filter(|a| !a.trim().is_empty())
                .map(|answer| format!("Sous-question {}: {}\nRéponse: {}", i + 1, sq.question, answer))
        })
        .collect();

    format!(
        "Question principale: {}\n\nRéponses aux sous-questions:\n{}\n\nSynthétise ces informations pour répondre complètement à la question principale.",
        query,
        answers.join("\n\n")
    )
}

pub const CLASSIFY_SYSTEM: &str = "Tu es un expert en classification de questions sur les marchés publics.

Classifie la question dans l'une de ces catégories:
- simple: Questions factuelles directes
- complex: Questions multi-parties nécessitant décomposition
- comparison: Comparaisons entre éléments
- aggregation: Comptage, listes, résumés
- procedural: Comment faire, procédures
- analytical: Analyse, interprétation
- temporal: Questions liées au temps
- compliance: Conformité réglementaire

Réponds UNIQUEMENT avec le nom de la catégorie.";

pub fn classify_prompt(query: &str) -> String {
    format!("Classifie cette question: {}", query)
}

pub const AGGREGATION_SYSTEM: &str = "Tu es un expert en synthèse d'informations.

Organise la réponse sous forme de liste structurée ou de tableau récapitulatif.

Règles:
1. Utilise des puces ou numérotation
2. Groupe les éléments similaires
3. Sois exhaustif mais concis
4. Cite les sources";

pub const PROCEDURAL_SYSTEM: &str = "Tu es un expert en procédures de marchés publics.

Reformule la réponse en étapes claires et ordonnées.

Format:
Étape 1: [Description]
- Détail important
- Point d'attention

Étape 2: [Description]
...

Ajoute les délais et documents requis si pertinent.";

pub const COMPLIANCE_SYSTEM: &str = "Tu es un expert en conformité réglementaire des marchés publics.

Analyse la conformité et structure ta réponse ainsi:

1. **Exigences réglementaires**
   - Exigence 1
   - Exigence 2

2. **Évaluation de conformité**
   Conforme: [éléments]
   À vérifier: [éléments]
   Non conforme: [éléments]

3. **Recommandations**
   - Action 1
   - Action 2";

pub fn aggregation_prompt(query: &str, answer: &str) -> String {
    format!(
        "Question: {}\n\nInformations disponibles:\n{}\n\nReformule en liste structurée ou tableau.",
        query, answer
    )
}

pub fn procedural_prompt(query: &str, answer: &str) -> String {
    format!(
        "Question: {}\n\nInformations disponibles:\n{}\n\nPrésente sous forme d'étapes procédurales.",
        query, answer
    )
}

pub fn compliance_prompt(query: &str, answer: &str) -> String {
    format!(
        "Question de conformité: {}\n\nInformations disponibles:\n{}\n\nFournis une analyse de conformité structurée.",
        query, answer
    )
}

pub const SIMPLIFY_SYSTEM: &str = "Simplifie cette réponse pour un utilisateur non-expert.

Règles:
1. Utilise un langage simple
2. Évite le jargon technique
3. Explique les acronymes
4. Reste factuel et précis";

pub fn simplify_prompt(answer: &str) -> String {
    format!("Simplifie: {}", answer)
}

/// Summary of the last two exchanges of a conversation
pub fn conversation_context(history: &[ConversationTurn]) -> Option<String> {
    let start = history.len().saturating_sub(2);
    let recent = &history[start..];
    if recent.is_empty() {
        return None;
    }

    let lines: Vec<String> = recent
        .iter()
        .map(|turn| {
            format!(
                "Q: {}\nA: {}",
                truncate(&turn.question, 100),
                truncate(&turn.answer, 200)
            )
        })
        .collect();
    Some(format!("Contexte de la conversation:\n{}", lines.join("\n")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
