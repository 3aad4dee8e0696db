//! Remote-helper protocol state machine.
//!
//! Reads newline-delimited commands from the version-control client and
//! answers in kind: `capabilities`, `list [for-push]`, `fetch` batches and
//! `push` batches. Every response group ends with exactly one blank line;
//! a blank input line at the top level ends the session.

use crate::api::IpfsApi;
use crate::fetch::Fetcher;
use crate::git::GitOps;
use crate::path::IpfsPath;
use crate::push::Pusher;
use crate::refs::{self, RefTable};
use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One protocol session against one remote.
///
/// Owns the ref table for the session; push commands borrow it, fetch
/// commands share the session's fetcher (and its memoized pack checkout).
pub struct Session {
    api: Arc<dyn IpfsApi>,
    git: Arc<dyn GitOps>,
    remote_name: String,
    remote_path: IpfsPath,
    default_branch: String,
    refs: RefTable,
    fetcher: Fetcher,
}

impl Session {
    pub fn new(
        api: Arc<dyn IpfsApi>,
        git: Arc<dyn GitOps>,
        git_dir: PathBuf,
        remote_name: String,
        remote_path: IpfsPath,
        default_branch: String,
    ) -> Self {
        let fetcher = Fetcher::new(
            Arc::clone(&api),
            Arc::clone(&git),
            git_dir,
            remote_path.clone(),
        );
        Self {
            api,
            git,
            remote_name,
            remote_path,
            default_branch,
            refs: RefTable::new(),
            fetcher,
        }
    }

    /// Drive the remote-helper conversation until end-of-input.
    pub async fn speak_git<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        for line in input.lines() {
            let line = line.context("reading helper command")?;
            debug!(command = %line, "client says");
            match line.as_str() {
                "capabilities" => {
                    writeln!(output, "fetch")?;
                    writeln!(output, "push")?;
                    writeln!(output)?;
                    output.flush()?;
                }

                l if l == "list" || l.starts_with("list ") => {
                    let for_push = l.contains("for-push");
                    self.cmd_list(for_push, &mut output).await?;
                }

                l if l.starts_with("fetch ") => {
                    let mut fields = l.split_whitespace();
                    let (sha1, name) = match (fields.next(), fields.next(), fields.next()) {
                        (Some("fetch"), Some(sha1), Some(name)) => (sha1, name),
                        _ => bail!("malformed fetch command: {:?}", l),
                    };
                    self.fetcher
                        .fetch(sha1)
                        .await
                        .with_context(|| format!("fetch {} ({})", sha1, name))?;
                    writeln!(output)?;
                    output.flush()?;
                }

                l if l.starts_with("push ") => {
                    let refspec = &l["push ".len()..];
                    let (src, dst) = refspec
                        .split_once(':')
                        .ok_or_else(|| anyhow!("malformed push command: {:?}", l))?;
                    if src.is_empty() {
                        // deletion refspec
                        writeln!(output, "error {} deleting remote refs is not supported", dst)?;
                    } else {
                        let pusher = Pusher::new(
                            Arc::clone(&self.api),
                            Arc::clone(&self.git),
                            self.remote_name.clone(),
                            self.remote_path.clone(),
                        );
                        match pusher.push(src, dst, &self.refs).await {
                            Ok(_root) => writeln!(output, "ok {}", dst)?,
                            Err(e) => {
                                let reason = format!("{e:#}").replace('\n', " ");
                                writeln!(output, "error {} {}", dst, reason)?;
                            }
                        }
                    }
                    output.flush()?;
                }

                "" => {
                    // end of the final batch
                    writeln!(output)?;
                    output.flush()?;
                    info!("end of session");
                    return Ok(());
                }

                other => bail!("unexpected helper command: {:?}", other),
            }
        }
        info!("client closed the command stream");
        Ok(())
    }

    async fn cmd_list<W: Write>(&mut self, for_push: bool, output: &mut W) -> Result<()> {
        self.refs.clear();
        match refs::from_index(self.api.as_ref(), &self.remote_path).await {
            Ok(table) => self.refs = table,
            Err(index_err) => {
                debug!(error = format!("{index_err:#}"), "no usable info/refs, walking refs/");
                match refs::by_walk(self.api.as_ref(), &self.remote_path).await {
                    Ok(table) => self.refs = table,
                    Err(walk_err) => {
                        if for_push {
                            // a remote that has never been pushed to has no
                            // refs to advertise
                            debug!(error = format!("{walk_err:#}"), "listing empty remote for push");
                        } else {
                            return Err(walk_err.context("no refs listable on remote"));
                        }
                    }
                }
            }
        }
        if self.refs.is_empty() && !for_push {
            bail!("remote advertises no refs");
        }

        let mut names: Vec<&String> = self.refs.keys().collect();
        names.sort();
        for name in names {
            writeln!(output, "{} {}", self.refs[name], name)?;
        }
        match refs::head_ref(
            self.api.as_ref(),
            &self.remote_path,
            &self.refs,
            &self.default_branch,
        )
        .await?
        {
            Some(hash) => writeln!(output, "{} HEAD", hash)?,
            None => {
                if !for_push {
                    bail!("cannot determine remote HEAD");
                }
            }
        }
        writeln!(output)?;
        output.flush()?;
        Ok(())
    }
}
