use itertools::Itertools;

use crate::database::SearchHit;

const INSTRUCTIONS: &str = "Você é um assistente que responde perguntas usando somente o contexto abaixo.\n\
Se o contexto não contiver a informação necessária, diga que não tem informações suficientes para responder.\n\
Responda de forma concisa.";

/// Join retrieved chunk texts, in retrieval order, with blank lines
#[inline]
pub fn format_docs(hits: &[SearchHit]) -> String {
    hits.iter().map(|hit| hit.text.as_str()).join("\n\n")
}

/// Fill the fixed instruction template with `context` and `question`
#[inline]
pub fn render_prompt(context: &str, question: &str) -> String {
    format!("{INSTRUCTIONS}\n\nContexto:\n{context}\n\nPergunta: {question}\n\nResposta:")
}
