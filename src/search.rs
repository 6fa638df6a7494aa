use crate::post::{Category, CategoryFilter, Post};

/// Posts passing both the category selector and the free-text query, in
/// their original order.
///
/// A blank query matches everything. Otherwise the lowercased query, surrounding
/// whitespace included, must be a substring of the title, description, author,
/// location or any tag.
pub fn filter_posts<'a>(posts: &'a [Post], filter: CategoryFilter, query: &str) -> Vec<&'a Post> {
    let blank = query.trim().is_empty();
    let needle = query.to_lowercase();

    posts
        .iter()
        .filter(|post| filter.matches(post.category))
        .filter(|post| blank || matches_text(post, &needle))
        .collect()
}

fn matches_text(post: &Post, needle: &str) -> bool {
    let contains = |field: &str| field.to_lowercase().contains(needle);

    contains(post.title.as_str())
        || contains(post.description.as_str())
        || contains(post.author.as_str())
        || post.tags.iter().any(|tag| contains(tag.as_str()))
        || contains(post.location.as_str())
}

pub fn listing_heading(filter: CategoryFilter) -> &'static str {
    match filter {
        CategoryFilter::All => "All Posts",
        CategoryFilter::Only(Category::Discussion) => "Discussions",
        CategoryFilter::Only(category) => category.label(),
    }
}

/// e.g. `3 posts for "gan"`.
pub fn result_summary(count: usize, query: &str) -> String {
    let noun = if count == 1 { "post" } else { "posts" };
    if query.is_empty() {
        format!("{} {}", count, noun)
    } else {
        format!("{} {} for \"{}\"", count, noun, query)
    }
}
