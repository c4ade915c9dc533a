//! The operation dispatcher.
//!
//! A name→handler table over the wire operations. Every handler re-checks
//! its preconditions against the real filesystem (never the content index)
//! before mutating anything, and every failure becomes an error reply on
//! this connection rather than anything fatal.

use std::path::{Path, PathBuf};

use netmount_types::{
    Attributes, CHUNK_SIZE, FsError, FsResult, MAX_DEPTH, Reply, Request, attributes_value,
};

use crate::probe;
use crate::quota;
use crate::sandbox::{self, Sandbox};
use crate::transfer::TransferTable;
use crate::user::User;
use crate::watch::Subscription;

/// Everything a handler may touch, borrowed from the running session.
pub struct OpContext<'a> {
    pub user: &'a User,
    pub sandbox: &'a Sandbox,
    pub subscription: &'a Subscription,
    pub transfers: &'a TransferTable,
}

/// Dispatch one request to its handler and wrap the outcome in a reply.
pub async fn dispatch(request: &Request, ctx: &OpContext<'_>) -> Reply {
    let op = request.op.as_str();
    let result = match op {
        "list" => list(ctx),
        "attributes" => attributes_op(request, ctx).await,
        "move" => relocate(request, ctx, true).await,
        "copy" => relocate(request, ctx, false).await,
        "delete" => delete(request, ctx).await,
        "makeDir" => make_dir(request, ctx).await,
        "writeFile" => write_file(request, ctx).await,
        "readFile" => read_file(request, ctx).await,
        other => Err(FsError::UnknownOperation(other.to_string())),
    };
    match result {
        Ok(data) => Reply::success(op, data),
        Err(error) => {
            tracing::debug!(user = %ctx.user.name(), op, %error, "operation failed");
            Reply::failure(op, error)
        }
    }
}

fn require<'r>(field: &'r Option<String>) -> FsResult<&'r str> {
    field.as_deref().ok_or(FsError::MalformedRequest)
}

fn list(ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    serde_json::to_value(ctx.subscription.contents())
        .map_err(|e| FsError::Io(std::io::Error::other(e)))
}

async fn attributes_op(request: &Request, ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    let path = ctx.sandbox.resolve(require(&request.path)?);
    Ok(attributes_value(probe::attributes(&path).await.as_ref()))
}

/// Shared policy for move and copy.
async fn relocate(
    request: &Request,
    ctx: &OpContext<'_>,
    is_move: bool,
) -> FsResult<serde_json::Value> {
    let src = ctx.sandbox.resolve(require(&request.path)?);
    let dest = ctx.sandbox.resolve(require(&request.dest)?);

    let src_attrs = probe::attributes(&src).await.ok_or(FsError::NoSuchFile)?;

    if sandbox::exceeds_depth(&dest) {
        return Err(FsError::TreeTooDeep);
    }
    if src_attrs.is_dir {
        // The whole relocated subtree must stay within the depth limit, so
        // walk the source before touching anything.
        let below = deepest_descendant_depth(&src).await;
        if sandbox::depth(&dest) + below > MAX_DEPTH {
            return Err(FsError::TreeTooDeep);
        }
        if dest.starts_with(&src) {
            return Err(FsError::DestinationExists);
        }
    }

    if let Some(ancestor) = existing_ancestor(parent_of(&dest, ctx.sandbox.root()), ctx).await {
        if ancestor.is_read_only {
            return Err(FsError::DestinationReadOnly);
        }
    }
    if is_move && src_attrs.is_read_only {
        return Err(FsError::CannotMoveReadOnly);
    }
    if probe::attributes(&dest).await.is_some() {
        return Err(FsError::DestinationExists);
    }

    copy_tree(&src, &dest).await?;
    if is_move {
        remove_all(&src, src_attrs.is_dir).await?;
    }
    Ok(serde_json::Value::Null)
}

async fn delete(request: &Request, ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    let path = ctx.sandbox.resolve(require(&request.path)?);
    let attrs = probe::attributes(&path).await.ok_or(FsError::NoSuchFile)?;
    if attrs.is_read_only {
        return Err(FsError::AccessDenied);
    }
    remove_all(&path, attrs.is_dir).await?;
    Ok(serde_json::Value::Null)
}

async fn make_dir(request: &Request, ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    let dest = ctx.sandbox.resolve(require(&request.path)?);
    if sandbox::exceeds_depth(&dest) {
        return Err(FsError::TreeTooDeep);
    }
    if probe::attributes(&dest).await.is_some() {
        return Err(FsError::DestinationExists);
    }
    if let Some(ancestor) = existing_ancestor(parent_of(&dest, ctx.sandbox.root()), ctx).await {
        if !ancestor.is_dir {
            return Err(FsError::CannotCreate);
        }
    }
    tokio::fs::create_dir_all(&dest).await?;
    Ok(serde_json::Value::Null)
}

async fn write_file(request: &Request, ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    let dest = ctx.sandbox.resolve(require(&request.path)?);
    if sandbox::exceeds_depth(&dest) {
        return Err(FsError::TreeTooDeep);
    }
    match probe::attributes(&dest).await {
        Some(attrs) if attrs.is_dir => return Err(FsError::CannotWriteToDirectory),
        Some(attrs) if attrs.is_read_only => return Err(FsError::AccessDenied),
        Some(_) => {}
        None => {
            // The leaf doesn't exist yet; a read-only directory anywhere
            // above it still refuses the write.
            if let Some(ancestor) =
                existing_ancestor(parent_of(&dest, ctx.sandbox.root()), ctx).await
            {
                if ancestor.is_read_only {
                    return Err(FsError::AccessDenied);
                }
            }
        }
    }
    let total = request.chunks.ok_or(FsError::MalformedRequest)?;
    if let Some(full) = total.checked_sub(1) {
        // An n-chunk upload carries at least (n-1)*CHUNK_SIZE + 1 bytes, so
        // an announcement that can never fit the user's free space is
        // refused before any per-chunk state is allocated.
        let (free, _) = quota::capacity(ctx.user).await;
        let floor = full.checked_mul(CHUNK_SIZE as u64);
        if floor.is_none_or(|bytes| bytes >= free) {
            return Err(FsError::OutOfSpace);
        }
    }
    let id = ctx
        .transfers
        .start_write(dest, ctx.user.clone(), total)
        .await;
    Ok(serde_json::json!({ "uuid": id }))
}

async fn read_file(request: &Request, ctx: &OpContext<'_>) -> FsResult<serde_json::Value> {
    let path = ctx.sandbox.resolve(require(&request.path)?);
    let attrs = probe::attributes(&path).await.ok_or(FsError::NoSuchFile)?;
    if attrs.is_dir {
        return Err(FsError::NoSuchFile);
    }
    let bytes = tokio::fs::read(&path).await?;
    let (id, chunks) = ctx.transfers.start_read(bytes);
    Ok(serde_json::json!({ "uuid": id, "chunks": chunks }))
}

fn parent_of(path: &Path, root: &Path) -> PathBuf {
    path.parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf())
}

/// Walk up from `start` until an existing entry is found. Bounded by the
/// sandbox root, which the watcher created, so this normally terminates
/// with the root's own attributes.
async fn existing_ancestor(start: PathBuf, ctx: &OpContext<'_>) -> Option<Attributes> {
    let root = ctx.sandbox.root();
    let mut path = start;
    loop {
        if let Some(attrs) = probe::attributes(&path).await {
            return Some(attrs);
        }
        if path == root {
            return None;
        }
        let parent = path.parent()?.to_path_buf();
        if !parent.starts_with(root) {
            return None;
        }
        path = parent;
    }
}

/// Deepest descendant depth below `root`, in segments.
async fn deepest_descendant_depth(root: &Path) -> usize {
    let mut max = 0;
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let child_depth = depth + 1;
            max = max.max(child_depth);
            if entry
                .metadata()
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                stack.push((entry.path(), child_depth));
            }
        }
    }
    max
}

/// Recursive copy with "fail if destination exists" semantics. Intermediate
/// directories below the closest existing ancestor are created on the way.
async fn copy_tree(src: &Path, dest: &Path) -> FsResult<()> {
    let meta = tokio::fs::metadata(src).await?;
    if meta.is_dir() {
        tokio::fs::create_dir_all(dest).await?;
        let mut stack = vec![(src.to_path_buf(), dest.to_path_buf())];
        while let Some((from, to)) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.metadata().await?.is_dir() {
                    create_dir_excl(&target).await?;
                    stack.push((entry.path(), target));
                } else {
                    copy_file_excl(&entry.path(), &target).await?;
                }
            }
        }
    } else {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        copy_file_excl(src, dest).await?;
    }
    Ok(())
}

async fn create_dir_excl(path: &Path) -> FsResult<()> {
    tokio::fs::create_dir(path).await.map_err(collision)
}

async fn copy_file_excl(src: &Path, dest: &Path) -> FsResult<()> {
    let mut from = tokio::fs::File::open(src).await?;
    let mut to = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
        .map_err(collision)?;
    tokio::io::copy(&mut from, &mut to).await?;
    Ok(())
}

fn collision(error: std::io::Error) -> FsError {
    if error.kind() == std::io::ErrorKind::AlreadyExists {
        FsError::DestinationExists
    } else {
        FsError::Io(error)
    }
}

async fn remove_all(path: &Path, is_dir: bool) -> FsResult<()> {
    if is_dir {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}
