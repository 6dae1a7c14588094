//! Operator console over TCP.
//!
//! Every command is relayed to the engine through its command channel,
//! so several console sessions can run at once; in particular a second
//! session can cancel a sync the first one is blocked on.

mod spec;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc::{Receiver, Sender, channel},
    sync::oneshot,
    task::JoinHandle,
};

use crate::{
    command::Command,
    error::{AppError, ErrorType},
    user_session::spec::Spec,
};

pub async fn start() -> std::io::Result<(Receiver<Command>, JoinHandle<()>)> {
    let (command_tx, command_rx) = channel(8);
    let listener = TcpListener::bind("127.0.0.1:9871").await?;
    let handle = tokio::spawn(async move {
        log::info!("Listening on port 9871");
        loop {
            match listener.accept().await {
                Ok((stream, _)) => start_session(stream, command_tx.clone()),
                Err(e) => log::error!("User connection accept error: {:?}", e),
            }
        }
    });
    return Ok((command_rx, handle));
}

fn start_session(stream: TcpStream, command_tx: Sender<Command>) {
    tokio::spawn(async move {
        let mut session = Session::new(stream, command_tx);
        if let Err(e) = session.run().await {
            log::debug!("console session ended: {:?}", e);
        }
    });
}

struct Session {
    stream: BufReader<TcpStream>,
    command_tx: Sender<Command>,
}

impl Session {
    pub fn new(stream: TcpStream, command_tx: Sender<Command>) -> Self {
        Self {
            stream: BufReader::new(stream),
            command_tx,
        }
    }

    pub async fn run(&mut self) -> std::io::Result<()> {
        self.stream
            .write_all(b"\r\n==========================\r\n welcome to v71 control\r\n==========================\r\n\r\n")
            .await?;

        loop {
            self.stream.write_all(b"v71> ").await?;
            let mut line = String::new();
            match self.stream.read_line(&mut line).await? {
                0 => {
                    log::debug!("Connection closed");
                    return Ok(());
                }
                _ => {
                    let trimmed = line.trim().to_string();
                    log::debug!("Received: {}", trimmed);
                    let tokens: Vec<String> = Self::tokenize(&trimmed);
                    if tokens.is_empty() {
                        continue;
                    }
                    let command = tokens[0].trim();
                    match command {
                        "hello" => {
                            self.stream.write_all(b"hi\r\n").await?;
                        }
                        "switch" => self.switch(command, &tokens).await?,
                        "get-name" => self.get_name(command, &tokens).await?,
                        "sync" => self.sync().await?,
                        "cancel" => self.cancel().await?,
                        "status" => self.status().await?,
                        "list" => self.list().await?,
                        "quit" => {
                            self.stream.write_all(b"bye!\r\n").await?;
                            return Ok(());
                        }
                        "" => {
                            // do nothing
                        }
                        _ => {
                            self.stream
                                .write_all(format!("{}: Unknown command\r\n", command).as_bytes())
                                .await?;
                        }
                    }
                }
            }
        }
    }

    async fn switch(&mut self, command: &str, tokens: &Vec<String>) -> std::io::Result<()> {
        let specs = vec![Spec::u16("kit", true), Spec::u8("channel", false)];
        let Some(params) = self.parse_params(command, tokens, &specs).await? else {
            return Ok(());
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        let kit_number = params[0].as_u16().unwrap();
        let channel = if params.len() > 1 {
            params[1].as_u8()
        } else {
            None
        };
        let command = Command::SwitchKit {
            kit_number,
            channel,
            resp: resp_tx,
        };
        self.command_tx.send(command).await.ok();
        return self
            .wait_and_handle_response(resp_rx, |_| "ok".to_string())
            .await;
    }

    async fn get_name(&mut self, command: &str, tokens: &Vec<String>) -> std::io::Result<()> {
        let specs = vec![Spec::u16("kit", true)];
        let Some(params) = self.parse_params(command, tokens, &specs).await? else {
            return Ok(());
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        let kit_number = params[0].as_u16().unwrap();
        let command = Command::GetName {
            kit_number,
            resp: resp_tx,
        };
        self.command_tx.send(command).await.ok();
        return self.wait_and_handle_response(resp_rx, |name| name).await;
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let command = Command::SyncNames { resp: resp_tx };
        self.command_tx.send(command).await.ok();
        self.stream
            .write_all(b"syncing kit names, this takes a while ... ")
            .await?;
        return self
            .wait_and_handle_response(resp_rx, |report| {
                let mut reply = format!(
                    "{:?}: matched {} of {} kits",
                    report.outcome, report.matched, report.attempted
                );
                if !report.missed.is_empty() {
                    reply.push_str(format!(", missed {:?}", report.missed).as_str());
                }
                return reply;
            })
            .await;
    }

    async fn cancel(&mut self) -> std::io::Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let command = Command::CancelSync { resp: resp_tx };
        self.command_tx.send(command).await.ok();
        return self
            .wait_and_handle_response(resp_rx, |_| "ok".to_string())
            .await;
    }

    async fn status(&mut self) -> std::io::Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let command = Command::Status { resp: resp_tx };
        self.command_tx.send(command).await.ok();
        return self
            .wait_and_handle_response(resp_rx, |status| {
                let state = if status.syncing {
                    format!("syncing, {:3.0}% done", status.progress * 100.0)
                } else {
                    "idle".to_string()
                };
                return match status.last_kit {
                    Some(kit_number) => format!("{}; last switched to kit {}", state, kit_number),
                    None => state,
                };
            })
            .await;
    }

    async fn list(&mut self) -> std::io::Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let command = Command::ListNames { resp: resp_tx };
        self.command_tx.send(command).await.ok();
        return self
            .wait_and_handle_response(resp_rx, |names| {
                if names.is_empty() {
                    return "no kit names known yet, run sync first".to_string();
                }
                return names
                    .iter()
                    .map(|entry| format!("kit {:3}  {}", entry.kit_number, entry.name))
                    .collect::<Vec<_>>()
                    .join("\r\n");
            })
            .await;
    }

    // Utilities ////////////////////////////////////////////////////////////////

    fn tokenize(input: &str) -> Vec<String> {
        return input
            .split_whitespace()
            .map(|token| token.to_string())
            .collect();
    }

    async fn parse_params(
        &mut self,
        command: &str,
        tokens: &Vec<String>,
        specs: &Vec<Spec>,
    ) -> std::io::Result<Option<Vec<spec::Param>>> {
        let mut params = Vec::new();
        for (i, spec) in specs.iter().enumerate() {
            if tokens.len() <= i + 1 {
                if spec.required {
                    self.usage(command, specs).await?;
                    return Ok(None);
                }
                break;
            }
            if let Ok(param) = (spec.parse)(&tokens[i + 1]) {
                params.push(param);
            } else {
                self.stream
                    .write_all(format!("Invalid {}\r\n", spec.name).as_bytes())
                    .await?;
                return Ok(None);
            }
        }
        return Ok(Some(params));
    }

    async fn usage(&mut self, command: &str, specs: &Vec<Spec>) -> std::io::Result<()> {
        let mut out = String::new();
        out += format!("Usage {}", command).as_str();
        for spec in specs {
            if spec.required {
                out += format!(" <{}>", spec.name).as_str();
            } else {
                out += format!(" [{}]", spec.name).as_str();
            }
        }
        out += "\r\n";
        self.stream.write_all(out.as_bytes()).await?;
        return Ok(());
    }

    async fn wait_and_handle_response<T, F>(
        &mut self,
        resp_rx: oneshot::Receiver<Result<T, AppError>>,
        stringify: F,
    ) -> std::io::Result<()>
    where
        F: Fn(T) -> String,
    {
        match resp_rx.await {
            Ok(Ok(response)) => {
                let reply = stringify(response);
                self.stream
                    .write_all(format!("{}\r\n", reply).as_bytes())
                    .await?;
            }
            Ok(Err(e)) => {
                log::warn!("Operation failed: {:?}", e);
                let error_message = match e.error_type {
                    ErrorType::Timeout => "timeout\r\n".to_string(),
                    _ => format!("Error: {:?}: {}\r\n", e.error_type, e.message),
                };
                self.stream.write_all(error_message.as_bytes()).await?;
            }
            Err(_) => {
                self.stream.write_all(b"Error: engine is gone\r\n").await?;
            }
        }
        return Ok(());
    }
}
