pub mod hacker_news;

pub use hacker_news::HackerNewsFeed;
