use crate::{handlers::IMAGE_FIELD, models::RenderedPost};
use std::fmt::Write;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Skalogram</title>
<style>
body { background: #111; color: #ddd; font-family: sans-serif; margin: 2rem auto; max-width: 40rem; }
.post { border: 1px solid #333; margin-bottom: 1.5rem; padding: 1rem; }
.ascii { font-family: monospace; font-size: 10px; line-height: 1; margin: 0; }
.votes a { color: #8cf; margin-right: 1rem; text-decoration: none; }
</style>
</head>
<body>
<h1>Skalogram</h1>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

/// Builds the feed page.
///
/// `rendered` is inserted verbatim: it is renderer output, which escapes its own glyphs.
pub fn render_feed(posts: &[RenderedPost]) -> String {
    let mut page = String::from(PAGE_HEAD);
    // Writing into a String cannot fail.
    let _ = write!(
        page,
        r#"<form action="/upload" method="post" enctype="multipart/form-data">
<input type="file" name="{}" accept="image/png,image/jpeg,image/gif" required>
<button type="submit">Upload</button>
</form>
"#,
        IMAGE_FIELD
    );

    if posts.is_empty() {
        page.push_str("<p>No posts yet.</p>\n");
    }
    for RenderedPost { post, rendered } in posts {
        let _ = write!(
            page,
            r#"<div class="post" id="post-{id}">
<pre class="ascii">{rendered}</pre>
<div class="votes"><a href="/upvote?id={id}">&#9650;</a><strong>{score}</strong> <a href="/downvote?id={id}">&#9660;</a><small>{created}</small></div>
</div>
"#,
            id = post.id,
            rendered = rendered,
            score = post.score,
            created = post.created_at.format("%Y-%m-%d %H:%M UTC"),
        );
    }

    page.push_str(PAGE_TAIL);
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn feed_lists_posts_in_given_order_with_vote_links() {
        let make = |score| RenderedPost {
            post: Post {
                id: Uuid::new_v4(),
                score,
                image_location: "mem://b/k.png".into(),
                created_at: Utc::now(),
            },
            rendered: format!("art{}", score),
        };
        let posts = vec![make(3), make(-1)];
        let page = render_feed(&posts);

        let first = page.find("art3").unwrap();
        let second = page.find("art-1").unwrap();
        assert!(first < second);
        assert!(page.contains(&format!("/upvote?id={}", posts[0].post.id)));
        assert!(page.contains(&format!("/downvote?id={}", posts[1].post.id)));
        assert!(page.contains(r#"name="postImg""#));
    }

    #[test]
    fn empty_feed_says_so() {
        assert!(render_feed(&[]).contains("No posts yet."));
    }
}
