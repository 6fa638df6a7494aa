use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const SAMPLE_POSTS: &str = include_str!("../data/posts.json");

/// Listing type. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "WTS")]
    Sell,
    #[serde(rename = "WTB")]
    Buy,
    #[serde(rename = "WTT")]
    Trade,
    Discussion,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Sell,
        Category::Buy,
        Category::Trade,
        Category::Discussion,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Category::Sell => "WTS",
            Category::Buy => "WTB",
            Category::Trade => "WTT",
            Category::Discussion => "Discussion",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Sell => "Want to Sell",
            Category::Buy => "Want to Buy",
            Category::Trade => "Want to Trade",
            Category::Discussion => "Discussion",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|category| category.code().eq_ignore_ascii_case(s))
            .with_context(|| format!("Unknown category '{}' (expected WTS, WTB, WTT or Discussion)", s))
    }
}

/// Category selector of the listing view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => wanted == category,
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(CategoryFilter::All)
        } else {
            s.parse().map(CategoryFilter::Only)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub location: String,
    pub author: String,
    pub contact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A post as submitted, before it is assigned an id and creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub category: Option<Category>,
    pub price: Option<f64>,
    pub location: String,
    pub author: String,
    pub contact: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
}

impl NewPost {
    fn into_post(self, id: String, created_at: DateTime<Utc>) -> Result<Post> {
        if self.title.trim().is_empty() {
            bail!("A post needs a title");
        }
        if self.author.trim().is_empty() {
            bail!("A post needs an author");
        }
        let Some(category) = self.category else {
            bail!("A post needs a category");
        };
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                bail!("Price must be a non-negative number, got {}", price);
            }
        }

        let tags = self
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(Post {
            id,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            category,
            price: self.price,
            location: self.location.trim().to_string(),
            author: self.author.trim().to_string(),
            contact: self.contact.trim().to_string(),
            image_url: self.image_url.filter(|url| !url.trim().is_empty()),
            created_at,
            tags,
        })
    }
}

/// Listing counts shown above the post grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryStats {
    pub total: usize,
    pub sell: usize,
    pub buy: usize,
    pub trade: usize,
    pub discussion: usize,
}

/// Session-lifetime post collection, newest first.
#[derive(Debug, Clone, Default)]
pub struct PostStore {
    posts: Vec<Post>,
}

impl PostStore {
    pub fn new(posts: Vec<Post>) -> Self {
        Self { posts }
    }

    /// The bundled sample listings.
    pub fn seeded() -> Result<Self> {
        let posts: Vec<Post> =
            serde_json::from_str(SAMPLE_POSTS).context("Failed to parse bundled sample posts")?;
        Ok(Self::new(posts))
    }

    pub fn all(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == id)
    }

    /// Validate and prepend a submitted post.
    pub fn create(&mut self, new_post: NewPost) -> Result<Post> {
        let post = new_post.into_post(Uuid::now_v7().to_string(), Utc::now())?;
        self.posts.insert(0, post.clone());
        Ok(post)
    }

    pub fn stats(&self) -> CategoryStats {
        self.posts
            .iter()
            .fold(CategoryStats::default(), |mut stats, post| {
                stats.total += 1;
                match post.category {
                    Category::Sell => stats.sell += 1,
                    Category::Buy => stats.buy += 1,
                    Category::Trade => stats.trade += 1,
                    Category::Discussion => stats.discussion += 1,
                }
                stats
            })
    }
}
