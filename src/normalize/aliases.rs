use crate::config::ColumnAliasConfig;
use crate::model::ImageKind;

/// Column roles the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    UserId,
    Image(ImageKind),
}

/// Declarative mapping from canonical fields to accepted header spellings.
///
/// Aliases are compared case-insensitively; earlier aliases win when a source
/// carries several of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAliasTable {
    entries: Vec<(CanonicalField, Vec<String>)>,
}

impl ColumnAliasTable {
    pub fn from_config(config: &ColumnAliasConfig) -> Self {
        let lowered = |aliases: &[String]| {
            aliases
                .iter()
                .map(|alias| alias.trim().to_ascii_lowercase())
                .filter(|alias| !alias.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            entries: vec![
                (CanonicalField::UserId, lowered(&config.user_id)),
                (
                    CanonicalField::Image(ImageKind::Public),
                    lowered(&config.profile_image),
                ),
                (
                    CanonicalField::Image(ImageKind::Additional),
                    lowered(&config.additional_images),
                ),
                (
                    CanonicalField::Image(ImageKind::Private),
                    lowered(&config.private_images),
                ),
            ],
        }
    }

    /// Resolve the table against one header row.
    pub fn resolve(&self, headers: &[String]) -> ResolvedColumns {
        let lowered: Vec<String> = headers
            .iter()
            .map(|header| header.trim().to_ascii_lowercase())
            .collect();
        let mut resolved = ResolvedColumns::default();
        for (field, aliases) in &self.entries {
            let hit = aliases
                .iter()
                .find_map(|alias| lowered.iter().position(|header| header == alias));
            let Some(index) = hit else {
                continue;
            };
            match field {
                CanonicalField::UserId => resolved.user_id = Some(index),
                CanonicalField::Image(kind) => resolved.images.push(ImageColumn {
                    kind: *kind,
                    index,
                    header: headers[index].trim().to_string(),
                }),
            }
        }
        resolved
    }
}

impl Default for ColumnAliasTable {
    fn default() -> Self {
        Self::from_config(&ColumnAliasConfig::default())
    }
}

/// One image column located in a source header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageColumn {
    pub kind: ImageKind,
    pub index: usize,
    /// Header as spelled in the source.
    pub header: String,
}

/// Column positions of one source, computed once per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumns {
    user_id: Option<usize>,
    images: Vec<ImageColumn>,
}

impl ResolvedColumns {
    pub fn user_id(&self) -> Option<usize> {
        self.user_id
    }

    pub fn image_columns(&self) -> &[ImageColumn] {
        &self.images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn alias_priority_prefers_earlier_spelling() {
        let table = ColumnAliasTable::default();
        let resolved = table.resolve(&headers(&["ID", "uid", "Private"]));
        assert_eq!(resolved.user_id(), Some(1));
        assert_eq!(resolved.image_columns().len(), 1);
        assert_eq!(resolved.image_columns()[0].kind, ImageKind::Private);
        assert_eq!(resolved.image_columns()[0].header, "Private");
    }

    #[test]
    fn custom_aliases_replace_defaults() {
        let config = ColumnAliasConfig {
            user_id: vec!["Member".to_string()],
            ..ColumnAliasConfig::default()
        };
        let table = ColumnAliasTable::from_config(&config);
        assert_eq!(table.resolve(&headers(&["user_id"])).user_id(), None);
        assert_eq!(table.resolve(&headers(&[" member "])).user_id(), Some(0));
        assert_eq!(table.resolve(&headers(&["MEMBER", "uid"])).user_id(), Some(0));
    }
}
