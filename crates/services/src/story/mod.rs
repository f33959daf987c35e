pub mod generator;
pub mod ports;
pub mod service;

pub use ports::{
    GeneratedStory, NewStory, Story, StoryError, StoryGenerator, StoryPrompt, StoryRepository,
    StoryService,
};
pub use generator::OpenAiStoryGenerator;
pub use service::StoryServiceImpl;
