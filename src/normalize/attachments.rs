use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::model::{ImageKind, ImageReference, SourceTag, UserId};

use super::tabular::{TabularSource, cell};
use super::{is_absent, parse_user_id, repair_scheme};

const ATTACHED_FILE_KEY: &str = "_wp_attached_file";
const UPLOADS_PREFIX: &str = "/wp-content/uploads/";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attachment {
    post_id: i64,
    token: String,
}

/// Attachment posts of the migrated CMS, grouped by author.
///
/// Built from the posts table and, when present, the post-meta table holding
/// `_wp_attached_file` paths. Each attachment yields an `Additional`
/// reference for its author.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentIndex {
    by_author: BTreeMap<UserId, Vec<Attachment>>,
    invalid_rows: usize,
}

impl AttachmentIndex {
    pub fn build(posts: &TabularSource, postmeta: Option<&TabularSource>) -> Self {
        let mut index = Self::default();
        let Some(author_col) = posts.column(&["post_author", "author"]) else {
            warn!(source = %posts.name, "Posts table has no author column; skipping attachments");
            return index;
        };
        let id_col = posts.column(&["id"]).unwrap_or(0);
        let guid_col = posts.column(&["guid"]);
        let attached_files = postmeta.map(attached_files).unwrap_or_default();

        for row in attachment_rows(posts) {
            let post_id = match parse_user_id(cell(row, id_col)) {
                Ok(id) => id.get(),
                Err(err) => {
                    index.invalid_rows += 1;
                    debug!(source = %posts.name, error = %err, "Skipping post without id");
                    continue;
                }
            };
            let author = match parse_user_id(cell(row, author_col)) {
                Ok(author) => author,
                Err(err) => {
                    index.invalid_rows += 1;
                    debug!(post_id, error = %err, "Skipping attachment without author");
                    continue;
                }
            };
            let token = match attached_files.get(&post_id) {
                Some(relative) => format!("{UPLOADS_PREFIX}{}", relative.trim_start_matches('/')),
                None => match guid_col.map(|col| cell(row, col)) {
                    Some(guid) if !is_absent(guid) => repair_scheme(guid),
                    _ => continue,
                },
            };
            index
                .by_author
                .entry(author)
                .or_default()
                .push(Attachment { post_id, token });
        }
        index
    }

    /// Attachment references ordered by author, then by post order in the table.
    pub fn references(&self) -> Vec<ImageReference> {
        self.by_author
            .iter()
            .flat_map(|(author, attachments)| {
                attachments.iter().map(|attachment| ImageReference {
                    user_id: *author,
                    kind: ImageKind::Additional,
                    raw_token: attachment.token.clone(),
                    provenance: SourceTag::Attachment {
                        post_id: attachment.post_id,
                    },
                })
            })
            .collect()
    }

    /// Posts skipped because their id or author was not numeric.
    pub fn invalid_rows(&self) -> usize {
        self.invalid_rows
    }
}

/// Rows typed `attachment`; else rows with a mime type; else every row.
fn attachment_rows(posts: &TabularSource) -> Vec<&Vec<String>> {
    if let Some(type_col) = posts.column(&["post_type"]) {
        return posts
            .rows
            .iter()
            .filter(|row| cell(row, type_col).trim().eq_ignore_ascii_case("attachment"))
            .collect();
    }
    if let Some(mime_col) = posts.column(&["post_mime_type"]) {
        return posts
            .rows
            .iter()
            .filter(|row| !is_absent(cell(row, mime_col)))
            .collect();
    }
    posts.rows.iter().collect()
}

fn attached_files(postmeta: &TabularSource) -> HashMap<i64, String> {
    let (Some(post_col), Some(key_col), Some(value_col)) = (
        postmeta.column(&["post_id"]),
        postmeta.column(&["meta_key"]),
        postmeta.column(&["meta_value"]),
    ) else {
        warn!(source = %postmeta.name, "Post-meta table lacks post_id/meta_key/meta_value");
        return HashMap::new();
    };
    let mut files = HashMap::new();
    for row in &postmeta.rows {
        if cell(row, key_col).trim() != ATTACHED_FILE_KEY {
            continue;
        }
        let value = cell(row, value_col).trim();
        if is_absent(value) {
            continue;
        }
        if let Ok(post_id) = parse_user_id(cell(row, post_col)) {
            files.entry(post_id.get()).or_insert_with(|| value.to_string());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, text: &str) -> TabularSource {
        TabularSource::parse(name, text).unwrap()
    }

    #[test]
    fn attached_file_wins_over_guid_and_non_attachments_are_skipped() {
        let posts = table(
            "wp_posts.csv",
            "ID,post_author,post_type,guid\n\
             10,3,attachment,https:/old.example/a.jpg\n\
             11,3,post,https://old.example/p\n\
             12,7,attachment,https://old.example/wp-content/uploads/2020/01/b.jpg\n\
             13,x,attachment,https://old.example/c.jpg\n",
        );
        let meta = table(
            "wp_postmeta.csv",
            "meta_id,post_id,meta_key,meta_value\n1,10,_wp_attached_file,2019/04/a.jpg\n",
        );
        let index = AttachmentIndex::build(&posts, Some(&meta));
        let refs = index.references();
        let tokens: Vec<_> = refs
            .iter()
            .map(|r| (r.user_id.get(), r.raw_token.as_str()))
            .collect();
        assert_eq!(
            tokens,
            vec![
                (3, "/wp-content/uploads/2019/04/a.jpg"),
                (7, "https://old.example/wp-content/uploads/2020/01/b.jpg"),
            ]
        );
        assert!(refs.iter().all(|r| r.kind == ImageKind::Additional));
        assert_eq!(refs[0].provenance, SourceTag::Attachment { post_id: 10 });
        assert_eq!(index.invalid_rows(), 1);
        assert_eq!(index.by_author.len(), 2);
    }

    #[test]
    fn mime_type_selects_attachments_when_type_column_missing() {
        let posts = table(
            "wp_posts.csv",
            "id,author,post_mime_type,guid\n1,4,image/png,https:/x.org/a.png\n2,4,,https://x.org/page\n",
        );
        let refs = AttachmentIndex::build(&posts, None).references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].raw_token, "https://x.org/a.png");
    }

    #[test]
    fn missing_author_column_yields_empty_index() {
        let posts = table("wp_posts.csv", "id,guid\n1,https://x.org/a.png\n");
        assert!(AttachmentIndex::build(&posts, None).references().is_empty());
    }
}
