use serde::{Deserialize, Serialize};

/// Row of `gov_schemes`, carrying both languages.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SchemeRow {
    pub id: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub title_en: String,
    pub title_hi: Option<String>,
    pub desc_en: Option<String>,
    pub desc_hi: Option<String>,
}

impl SchemeRow {
    /// Hindi text when `lang` is "hi" and present, English otherwise
    pub fn localize(self, lang: &str) -> Scheme {
        let hindi = lang == "hi";
        let title = match (hindi, self.title_hi) {
            (true, Some(title)) if !title.is_empty() => title,
            _ => self.title_en,
        };
        let description = match (hindi, self.desc_hi) {
            (true, Some(desc)) if !desc.is_empty() => desc,
            _ => self.desc_en.unwrap_or_default(),
        };

        Scheme {
            id: self.id,
            icon: self.icon,
            color: self.color,
            title,
            description,
        }
    }
}

/// A government scheme as shown in the listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub title: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SchemeRow {
        serde_json::from_str(
            r##"{"id": "pm-kisan", "icon": "seedling", "color": "#388e3c",
                "title_en": "PM-KISAN", "title_hi": "पीएम-किसान",
                "desc_en": "Income support", "desc_hi": null}"##,
        )
        .unwrap()
    }

    #[test]
    fn test_localize() {
        let hi = row().localize("hi");
        assert_eq!(hi.title, "पीएम-किसान");
        assert_eq!(hi.description, "Income support");

        let en = row().localize("en");
        assert_eq!(en.title, "PM-KISAN");
        assert_eq!(en.color.as_deref(), Some("#388e3c"));
    }
}
