use crate::message::{Action, Message};
use crate::port::PortId;
use crate::units::UnitDescriptor;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{Receiver, Sender, channel};

const RESPONSE_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct Client {
    tx: Sender<Message>,
}

impl Client {
    pub fn new(tx: Sender<Message>) -> Self {
        Self { tx }
    }

    /// Registers a new response channel with the engine.
    pub async fn subscribe(&self) -> Result<Receiver<Message>, SendError<Message>> {
        let (tx, rx) = channel(RESPONSE_QUEUE);
        self.tx.send(Message::Channel(tx)).await?;
        Ok(rx)
    }

    pub async fn send(&self, action: Action) -> Result<(), SendError<Message>> {
        self.tx.send(Message::Request(action)).await
    }

    pub async fn quit(self) -> Result<(), SendError<Message>> {
        self.send(Action::Quit).await
    }

    pub async fn add_unit(&self, descriptor: UnitDescriptor) -> Result<(), SendError<Message>> {
        self.send(Action::AddUnit(descriptor)).await
    }

    pub async fn connect(&self, src: PortId, dest: PortId) -> Result<(), SendError<Message>> {
        self.send(Action::Connect {
            src,
            dest,
            multiplier: 1.0,
            locked: false,
        })
        .await
    }

    pub async fn disconnect(&self, src: PortId, dest: PortId) -> Result<(), SendError<Message>> {
        self.send(Action::Disconnect { src, dest }).await
    }

    pub async fn play(&self) -> Result<(), SendError<Message>> {
        self.send(Action::Play).await
    }

    pub async fn pause(&self) -> Result<(), SendError<Message>> {
        self.send(Action::Pause).await
    }
}
