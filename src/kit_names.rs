//! Kit name store.
//!
//! The sync engine never keeps decoded names; it hands each one to this
//! task as soon as the frame decodes. Names stored before a cancelled or
//! failed sync stay stored.

use std::collections::BTreeMap;

use tokio::{
    sync::{
        mpsc::{Receiver, Sender, channel},
        oneshot,
    },
    task::JoinHandle,
};

#[derive(Debug, Clone)]
pub struct KitName {
    pub kit_number: u16,
    pub name: String,
}

pub enum Operation {
    Store {
        kit_number: u16,
        name: String,
    },
    Get {
        kit_number: u16,
        resp: oneshot::Sender<Option<String>>,
    },
    List {
        resp: oneshot::Sender<Vec<KitName>>,
    },
}

pub fn start() -> (Sender<Operation>, JoinHandle<()>) {
    let (operation_tx, operation_rx) = channel(32);
    let handle = tokio::spawn(async move {
        handle_requests(operation_rx).await;
    });
    return (operation_tx, handle);
}

async fn handle_requests(mut operation_rx: Receiver<Operation>) {
    let mut names: BTreeMap<u16, String> = BTreeMap::new();
    while let Some(request) = operation_rx.recv().await {
        match request {
            Operation::Store { kit_number, name } => {
                log::info!("kit {} is named {:?}", kit_number, name);
                names.insert(kit_number, name);
            }
            Operation::Get { kit_number, resp } => {
                resp.send(names.get(&kit_number).cloned()).ok();
            }
            Operation::List { resp } => {
                let list = names
                    .iter()
                    .map(|(kit_number, name)| KitName {
                        kit_number: *kit_number,
                        name: name.clone(),
                    })
                    .collect();
                resp.send(list).ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_list() {
        let (names_tx, _handle) = start();
        for (kit_number, name) in [(2u16, "Rock Kit"), (1, "Jazz Kit")] {
            names_tx
                .send(Operation::Store {
                    kit_number,
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        names_tx.send(Operation::List { resp: resp_tx }).await.unwrap();
        let list = resp_rx.await.unwrap();
        assert_eq!(list.len(), 2);
        // listing is ordered by kit number
        assert_eq!(list[0].kit_number, 1);
        assert_eq!(list[0].name, "Jazz Kit");
        assert_eq!(list[1].kit_number, 2);
    }

    #[tokio::test]
    async fn test_store_overwrites_and_get() {
        let (names_tx, _handle) = start();
        for name in ["Old", "New"] {
            names_tx
                .send(Operation::Store {
                    kit_number: 9,
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        names_tx
            .send(Operation::Get {
                kit_number: 9,
                resp: resp_tx,
            })
            .await
            .unwrap();
        assert_eq!(resp_rx.await.unwrap(), Some("New".to_string()));

        let (resp_tx, resp_rx) = oneshot::channel();
        names_tx
            .send(Operation::Get {
                kit_number: 10,
                resp: resp_tx,
            })
            .await
            .unwrap();
        assert_eq!(resp_rx.await.unwrap(), None);
    }
}
