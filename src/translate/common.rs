use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Full language name for a code, for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "en" => "English",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "sv" => "Swedish",
        "uk" => "Ukrainian",
        "he" => "Hebrew",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Build a JSON-mode translation prompt for one subtitle line
pub fn build_translation_prompt(
    text: &str,
    source_language: &str,
    target_language: &str,
    context: &str,
) -> String {
    let source_name = language_code_to_name(source_language);
    let target_name = language_code_to_name(target_language);

    let mut prompt = format!(
        "You are a professional subtitle translator.\n\
         \n\
         Translate the following {} subtitle line to {} ONLY (language code: {}).\n\
         Keep it short enough to read on screen.\n\
         \n\
         Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
         Do not include any explanations, alternatives, or text in other languages.\n\
         \n\
         [Text to translate]\n\
         {}\n",
        source_name, target_name, target_language, target_name, text
    );

    if !context.trim().is_empty() {
        prompt.push_str(&format!(
            "\n[Previous lines for reference - DO NOT translate this part]\n{}\n",
            context
        ));
    }

    prompt
}

/// Pull the translation out of a model response that ignored the JSON format
pub fn clean_translation_response(response: &str) -> String {
    if let Ok(result) = serde_json::from_str::<TranslationResult>(response.trim()) {
        return result.text.trim().to_string();
    }

    for line in response.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty()
            || trimmed.starts_with("Here are")
            || trimmed.starts_with("Option")
            || trimmed.starts_with("**Option")
            || trimmed.starts_with("Translation:")
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
        {
            continue;
        }

        if trimmed.starts_with("**") && trimmed.ends_with("**") {
            continue;
        }

        return trimmed.to_string();
    }

    response.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_json_response() {
        assert_eq!(clean_translation_response(r#"{"text": " 你好 "}"#), "你好");
    }

    #[test]
    fn test_clean_chatty_response() {
        let response = "Here are some options:\n**Option 1**\n你好，世界\n";
        assert_eq!(clean_translation_response(response), "你好，世界");
    }

    #[test]
    fn test_prompt_names_languages() {
        let prompt = build_translation_prompt("Hello", "en", "zh", "previous line");
        assert!(prompt.contains("English subtitle line to Chinese"));
        assert!(prompt.contains("previous line"));
        assert!(!build_translation_prompt("Hello", "en", "xx", "").contains("[Previous lines"));
    }
}
