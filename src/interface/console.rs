use crate::{
    bus::{Event, EventBus},
    chat::ChatConversation,
    marketplace::Marketplace,
    post::{CategoryFilter, NewPost, Post},
    search,
    store::KeyValueStore,
};
use anyhow::{bail, Context, Result};
use std::{str::FromStr, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const HELP: &str = "These commands are supported:
/posts                     Show the listing for the current category and search
/category <all|WTS|WTB|WTT|Discussion>
/search [query]            Search titles, descriptions, authors, tags and locations
/show <post-id>            Show a post in full
/new <title> | <category> | <price or -> | <location> | <contact> | <tags,comma,separated> | <description>
/chat <post-id>            Open your chat about a post
/chats                     List your conversations
/open <n>                  Open the n-th conversation of the last /chats listing
/close                     Close the open chat
/stats                     Listing counts per category
/help                      Display this text
/quit                      Leave
Any other line is sent to the open chat.";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Posts,
    Category(CategoryFilter),
    Search(String),
    Show(String),
    New(Box<NewPost>),
    Chat(String),
    Chats,
    Open(usize),
    Close,
    Stats,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };

        let required = |usage: &str| -> Result<String> {
            if arg.is_empty() {
                bail!("Usage: {}", usage);
            }
            Ok(arg.to_string())
        };

        Ok(match name.to_ascii_lowercase().as_str() {
            "/help" | "/start" => Command::Help,
            "/posts" => Command::Posts,
            "/category" => Command::Category(required("/category <all|WTS|WTB|WTT|Discussion>")?.parse()?),
            "/search" => Command::Search(arg.to_string()),
            "/show" => Command::Show(required("/show <post-id>")?),
            "/new" => Command::New(Box::new(parse_new_post(arg)?)),
            "/chat" => Command::Chat(required("/chat <post-id>")?),
            "/chats" => Command::Chats,
            "/open" => {
                let n: usize = required("/open <n>")?
                    .parse()
                    .context("Usage: /open <n>")?;
                if n == 0 {
                    bail!("Conversations are numbered from 1");
                }
                Command::Open(n)
            }
            "/close" => Command::Close,
            "/stats" => Command::Stats,
            "/quit" | "/exit" => Command::Quit,
            other => bail!("Unknown command {}. Use /help to see what I can do.", other),
        })
    }
}

/// `/new` arguments: seven `|`-separated fields. The author is filled in later.
fn parse_new_post(arg: &str) -> Result<NewPost> {
    let fields: Vec<&str> = arg.split('|').map(str::trim).collect();
    let &[title, category, price, location, contact, tags, description] = fields.as_slice() else {
        bail!("Usage: /new <title> | <category> | <price or -> | <location> | <contact> | <tags> | <description>");
    };

    let price = match price {
        "" | "-" => None,
        value => Some(
            value
                .trim_start_matches('$')
                .parse::<f64>()
                .with_context(|| format!("'{}' is not a price", value))?,
        ),
    };

    Ok(NewPost {
        title: title.to_string(),
        description: description.to_string(),
        category: Some(category.parse()?),
        price,
        location: location.to_string(),
        author: String::new(),
        contact: contact.to_string(),
        image_url: None,
        tags: tags.split(',').map(str::to_string).collect(),
    })
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("${:.0}", price)
    } else {
        format!("${:.2}", price)
    }
}

fn post_line(post: &Post) -> String {
    let mut line = format!("[{}] {} ({})", post.category, post.title, post.id);
    if let Some(price) = post.price {
        line.push_str(&format!(" {}", format_price(price)));
    }
    line.push_str(&format!(" - {} - by {}", post.location, post.author));
    line
}

fn post_detail(post: &Post) -> String {
    let mut text = format!("{}\n{}\n", post_line(post), post.description);
    if !post.tags.is_empty() {
        text.push_str(&format!("Tags: {}\n", post.tags.join(", ")));
    }
    if let Some(url) = &post.image_url {
        text.push_str(&format!("Image: {}\n", url));
    }
    text.push_str(&format!(
        "Contact: {}\nPosted: {}",
        post.contact,
        post.created_at.format("%Y-%m-%d")
    ));
    text
}

fn conversation_view(conversation: &ChatConversation, viewer_id: &str) -> String {
    let other = conversation.other_participant(viewer_id);
    let mut text = format!("Chat about: {}\nWith: {}\n", conversation.post_title, other);
    if conversation.messages.is_empty() {
        text.push_str(&format!(
            "Start the conversation. Send a message to {} about this item.",
            other.name
        ));
    }
    for msg in &conversation.messages {
        let who = if msg.sender_id == viewer_id {
            "you"
        } else {
            msg.sender_name.as_str()
        };
        text.push_str(&format!(
            "[{}] {}: {}\n",
            msg.timestamp.format("%H:%M"),
            who,
            msg.message
        ));
    }
    text.trim_end().to_string()
}

/// Line-oriented stand-in for the browser UI. Holds only transient copies of
/// what it renders.
pub struct ConsoleInterface<S> {
    marketplace: Marketplace<S>,
    event_bus: Arc<EventBus>,
    active_chat: Option<ChatConversation>,
    last_listing: Vec<ChatConversation>,
}

impl<S: KeyValueStore> ConsoleInterface<S> {
    pub fn new(marketplace: Marketplace<S>, event_bus: Arc<EventBus>) -> Self {
        Self {
            marketplace,
            event_bus,
            active_chat: None,
            last_listing: Vec::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut bus_rx = self.event_bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = bus_rx.recv().await {
                match event {
                    Event::PostCreated(post) => println!("* New post: {}", post_line(&post)),
                    Event::MessageSent {
                        conversation_id,
                        message,
                    } => info!(
                        "Message {} stored in conversation {}",
                        message.id, conversation_id
                    ),
                    Event::ConversationRead {
                        conversation_id,
                        count,
                    } => info!("Marked {} messages read in {}", count, conversation_id),
                }
            }
        });

        let viewer = self.marketplace.viewer().clone();
        println!("Welcome to CubeOffers, {}! Use /help to see what I can do.", viewer.name);
        self.show_posts();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !line.starts_with('/') {
                if let Err(e) = self.send(line).await {
                    error!("Failed to send message: {}", e);
                    println!("Failed to send message.");
                }
                continue;
            }

            match line.parse::<Command>() {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    if let Err(e) = self.handle(command).await {
                        println!("{:#}", e);
                    }
                }
                Err(e) => println!("{:#}", e),
            }
        }

        info!("Console closed");
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Help => println!("{}", HELP),
            Command::Posts => self.show_posts(),
            Command::Category(filter) => {
                self.marketplace.set_category(filter);
                self.show_posts();
            }
            Command::Search(query) => {
                self.marketplace.set_query(query);
                self.show_posts();
            }
            Command::Show(id) => match self.marketplace.post(&id) {
                Some(post) => println!("{}", post_detail(post)),
                None => println!("Post '{}' not found.", id),
            },
            Command::New(new_post) => {
                let new_post = NewPost {
                    author: self.marketplace.viewer().name.clone(),
                    ..*new_post
                };
                self.marketplace.create_post(new_post)?;
                self.show_posts();
            }
            Command::Chat(post_id) => {
                let opened = self.marketplace.open_chat(&post_id).await?;
                match opened {
                    Some(conversation) => self.show_chat(conversation),
                    None => println!("Post '{}' not found.", post_id),
                }
            }
            Command::Chats => self.show_chats().await?,
            Command::Open(n) => {
                let Some(conversation) = self.last_listing.get(n - 1).cloned() else {
                    println!("No conversation {}. Use /chats first.", n);
                    return Ok(());
                };
                // A conversation whose post is gone is not opened.
                let selected = self.marketplace.select_conversation(conversation).await?;
                if let Some((_, conversation)) = selected {
                    self.show_chat(conversation);
                }
            }
            Command::Close => {
                self.active_chat = None;
                println!("Chat closed.");
            }
            Command::Stats => {
                let stats = self.marketplace.stats();
                println!(
                    "Total Posts: {}\nFor Sale: {}\nWanted: {}\nFor Trade: {}\nDiscussions: {}",
                    stats.total, stats.sell, stats.buy, stats.trade, stats.discussion
                );
            }
            Command::Quit => {}
        }
        Ok(())
    }

    async fn send(&mut self, body: &str) -> Result<()> {
        let Some(conversation) = self.active_chat.take() else {
            println!("No chat is open. Use /chat <post-id> or /chats.");
            return Ok(());
        };

        let before = conversation.messages.len();
        let conversation = self.marketplace.send_message(conversation, body).await?;
        if conversation.messages.len() > before {
            let viewer_id = &self.marketplace.viewer().id;
            println!("Sent to {}.", conversation.other_participant(viewer_id).name);
        }
        self.active_chat = Some(conversation);
        Ok(())
    }

    fn show_chat(&mut self, conversation: ChatConversation) {
        println!(
            "{}",
            conversation_view(&conversation, &self.marketplace.viewer().id)
        );
        self.active_chat = Some(conversation);
    }

    fn show_posts(&self) {
        let posts = self.marketplace.visible_posts();
        let query = self.marketplace.query();
        println!(
            "{} ({})",
            search::listing_heading(self.marketplace.category()),
            search::result_summary(posts.len(), query)
        );

        if posts.is_empty() {
            if query.is_empty() {
                println!("No posts in this category yet");
            } else {
                println!("No posts match \"{}\"", query);
            }
            return;
        }

        for post in posts {
            println!("  {}", post_line(post));
        }
    }

    async fn show_chats(&mut self) -> Result<()> {
        self.last_listing = self.marketplace.conversations().await?;
        let viewer_id = self.marketplace.viewer().id.clone();

        if self.last_listing.is_empty() {
            println!("No conversations yet. Start chatting with /chat <post-id>.");
            return Ok(());
        }

        println!("Your Chats:");
        for (i, conversation) in self.last_listing.iter().enumerate() {
            let unread = if conversation.has_unread_for(&viewer_id) {
                " *"
            } else {
                ""
            };
            let mut line = format!(
                "{}. {}{} - {}",
                i + 1,
                conversation.other_participant(&viewer_id).name,
                unread,
                conversation.post_title
            );
            if let Some(last) = &conversation.last_message {
                line.push_str(&format!(
                    "\n   {} ({})",
                    last.message,
                    last.timestamp.format("%Y-%m-%d")
                ));
            }
            println!("{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Category;

    #[test]
    fn parses_commands() {
        assert_eq!("/posts".parse::<Command>().unwrap(), Command::Posts);
        assert_eq!(
            "/category wtt".parse::<Command>().unwrap(),
            Command::Category(CategoryFilter::Only(Category::Trade))
        );
        assert_eq!(
            "/search  gan cube ".parse::<Command>().unwrap(),
            Command::Search("gan cube".to_string())
        );
        assert_eq!("/search".parse::<Command>().unwrap(), Command::Search(String::new()));
        assert_eq!("/open 2".parse::<Command>().unwrap(), Command::Open(2));
        assert!("/open 0".parse::<Command>().is_err());
        assert!("/chat".parse::<Command>().is_err());
        assert!("/dance".parse::<Command>().is_err());
    }

    #[test]
    fn parses_new_post() {
        let command = "/new Skewb | WTT | - | Oslo | me@example.com | skewb, qiyi | Fun puzzle"
            .parse::<Command>()
            .unwrap();
        let Command::New(new_post) = command else {
            panic!("expected /new");
        };
        assert_eq!(new_post.title, "Skewb");
        assert_eq!(new_post.category, Some(Category::Trade));
        assert_eq!(new_post.price, None);
        assert_eq!(new_post.tags, vec!["skewb", " qiyi"]);
        assert_eq!(new_post.description, "Fun puzzle");

        let priced = parse_new_post("A | WTS | $12.50 | L | C | t | D").unwrap();
        assert_eq!(priced.price, Some(12.5));

        assert!(parse_new_post("A | WTS | cheap | L | C | t | D").is_err());
        assert!(parse_new_post("too | few").is_err());
    }

    #[test]
    fn chat_view_names_the_other_side() {
        use crate::entity::Participant;

        let conversation = ChatConversation::new(
            "1-user-123",
            "1",
            "GAN 356 M",
            Participant::new("user-123", "CurrentUser"),
            Participant::author("CubeMaster2023"),
        );

        let view = conversation_view(&conversation, "user-123");
        assert!(view.contains("With: CubeMaster2023 (CubeMaster2023)"));

        let view = conversation_view(&conversation, "CubeMaster2023");
        assert!(view.contains("With: CurrentUser (user-123)"));
    }

    #[test]
    fn formats_prices() {
        assert_eq!(format_price(25.0), "$25");
        assert_eq!(format_price(45.5), "$45.50");
    }
}
